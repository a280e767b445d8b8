use std::collections::BTreeMap;

use snafu::{OptionExt, Snafu};
use stackable_operator::k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};

const MEMORY: &str = "memory";
const CPU: &str = "cpu";

/// Upper bound of a memory request derived from the memory limit
pub const MAX_DEFAULT_MEMORY_REQUEST: &str = "2Gi";

/// Marks a reloader resource as unbounded
const UNSET_QUANTITY: &str = "0";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid memory quantity {quantity:?}"))]
    InvalidMemoryQuantity { quantity: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// The amount of a quantity in bytes.
///
/// Accepts the whole Kubernetes quantity grammar: binary suffixes (`Ki` to `Ei`), decimal
/// suffixes (`n` to `E`), decimal exponents (`3e9`) and plain numbers.
fn quantity_bytes(quantity: &Quantity) -> Result<f64> {
    let raw = quantity.0.trim();
    let is_number = |index: usize, c: char| {
        c.is_ascii_digit() || c == '.' || (index == 0 && (c == '+' || c == '-'))
    };
    let number_end = raw
        .char_indices()
        .find(|&(index, c)| !is_number(index, c))
        .map_or(raw.len(), |(index, _)| index);
    let (number, suffix) = raw.split_at(number_end);

    let invalid = || InvalidMemoryQuantitySnafu {
        quantity: quantity.0.clone(),
    };
    let number: f64 = number.parse().ok().context(invalid())?;
    let multiplier = match suffix {
        "Ki" => 2f64.powi(10),
        "Mi" => 2f64.powi(20),
        "Gi" => 2f64.powi(30),
        "Ti" => 2f64.powi(40),
        "Pi" => 2f64.powi(50),
        "Ei" => 2f64.powi(60),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "" => 1.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exponent => {
            let exponent = exponent
                .strip_prefix(['e', 'E'])
                .and_then(|exponent| exponent.parse::<i32>().ok())
                .context(invalid())?;
            10f64.powi(exponent)
        }
    };
    Ok(number * multiplier)
}

/// Resources of the Prometheus container.
///
/// If a memory limit but no memory request is given, the request defaults to the limit, capped
/// at [`MAX_DEFAULT_MEMORY_REQUEST`]. Everything else is passed through unchanged.
pub fn prometheus_resources(requested: &ResourceRequirements) -> Result<ResourceRequirements> {
    let mut resources = requested.clone();

    let memory_limit = resources
        .limits
        .as_ref()
        .and_then(|limits| limits.get(MEMORY))
        .cloned();
    let has_memory_request = resources
        .requests
        .as_ref()
        .is_some_and(|requests| requests.contains_key(MEMORY));

    if let (Some(limit), false) = (memory_limit, has_memory_request) {
        let cap = Quantity(MAX_DEFAULT_MEMORY_REQUEST.to_string());
        let request = if quantity_bytes(&limit)? <= quantity_bytes(&cap)? {
            limit
        } else {
            cap
        };
        tracing::debug!(?request, "Deriving memory request from memory limit");

        resources
            .requests
            .get_or_insert_with(BTreeMap::new)
            .insert(MEMORY.to_string(), request);
    }

    Ok(resources)
}

/// The memory request in bytes, if any. Fractional bytes round up.
pub fn memory_request_bytes(resources: &ResourceRequirements) -> Result<Option<u64>> {
    resources
        .requests
        .as_ref()
        .and_then(|requests| requests.get(MEMORY))
        .map(|request| Ok(quantity_bytes(request)?.ceil() as u64))
        .transpose()
}

/// Identical requests and limits for the reloader sidecars, a value of `0` leaves that resource
/// unbounded
pub fn reloader_resources(cpu: &str, memory: &str) -> ResourceRequirements {
    let quantities: BTreeMap<String, Quantity> = [(CPU, cpu), (MEMORY, memory)]
        .into_iter()
        .filter(|(_, value)| {
            let value = value.trim();
            !value.is_empty() && value != UNSET_QUANTITY
        })
        .map(|(resource, value)| (resource.to_string(), Quantity(value.trim().to_string())))
        .collect();

    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..ResourceRequirements::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ResourceRequirements {
        serde_yaml::from_str(input).expect("illegal test input")
    }

    fn memory_request(resources: &ResourceRequirements) -> Option<&str> {
        resources
            .requests
            .as_ref()
            .and_then(|requests| requests.get(MEMORY))
            .map(|quantity| quantity.0.as_str())
    }

    #[test]
    fn test_small_limit_becomes_request() {
        let resources = prometheus_resources(&parse(
            r#"
            limits:
              memory: 1Gi
            "#,
        ))
        .unwrap();
        assert_eq!(memory_request(&resources), Some("1Gi"));
    }

    #[test]
    fn test_large_limit_is_capped() {
        let resources = prometheus_resources(&parse(
            r#"
            limits:
              memory: 3Gi
              cpu: "2"
            "#,
        ))
        .unwrap();
        assert_eq!(memory_request(&resources), Some("2Gi"));
        assert_eq!(
            resources.limits.as_ref().and_then(|l| l.get(MEMORY)),
            Some(&Quantity("3Gi".to_string()))
        );
    }

    #[test]
    fn test_decimal_and_plain_limits() {
        for (limit, expected) in [
            ("4G", "2Gi"),
            ("1G", "1G"),
            ("500M", "500M"),
            ("1500000000", "1500000000"),
            ("3e9", "2Gi"),
            ("2147483648", "2147483648"),
            ("2147483649", "2Gi"),
        ] {
            let resources =
                prometheus_resources(&parse(&format!("limits:\n  memory: {limit:?}"))).unwrap();
            assert_eq!(memory_request(&resources), Some(expected), "limit {limit}");
        }
    }

    #[test]
    fn test_explicit_request_is_kept() {
        let resources = prometheus_resources(&parse(
            r#"
            limits:
              memory: 3Gi
            requests:
              memory: 512Mi
            "#,
        ))
        .unwrap();
        assert_eq!(memory_request(&resources), Some("512Mi"));
    }

    #[test]
    fn test_no_limit_sets_nothing() {
        let resources = prometheus_resources(&ResourceRequirements::default()).unwrap();
        assert_eq!(resources, ResourceRequirements::default());
    }

    #[test]
    fn test_invalid_limit() {
        for limit in ["lots", "1Gb", "e3", "1e", "1.2.3Gi"] {
            assert!(
                prometheus_resources(&parse(&format!("limits:\n  memory: {limit:?}"))).is_err(),
                "limit {limit}"
            );
        }
    }

    #[test]
    fn test_memory_request_bytes() {
        let resources = parse(
            r#"
            requests:
              memory: 400Mi
            "#,
        );
        assert_eq!(
            memory_request_bytes(&resources).unwrap(),
            Some(400 * 1024 * 1024)
        );
        assert_eq!(
            memory_request_bytes(&ResourceRequirements::default()).unwrap(),
            None
        );

        for (request, bytes) in [
            ("1G", 1_000_000_000),
            ("3e9", 3_000_000_000),
            ("1500000000", 1_500_000_000),
            ("1.5Ki", 1536),
            ("1500m", 2),
        ] {
            let resources = parse(&format!("requests:\n  memory: {request:?}"));
            assert_eq!(
                memory_request_bytes(&resources).unwrap(),
                Some(bytes),
                "request {request}"
            );
        }
    }

    #[test]
    fn test_reloader_resources() {
        let resources = reloader_resources("100m", "25Mi");
        let expected: BTreeMap<String, Quantity> = [
            ("cpu".to_string(), Quantity("100m".to_string())),
            ("memory".to_string(), Quantity("25Mi".to_string())),
        ]
        .into();
        assert_eq!(resources.limits, Some(expected.clone()));
        assert_eq!(resources.requests, Some(expected));
    }

    #[test]
    fn test_reloader_resources_unset() {
        let resources = reloader_resources("0", "25Mi");
        let expected: BTreeMap<String, Quantity> =
            [("memory".to_string(), Quantity("25Mi".to_string()))].into();
        assert_eq!(resources.limits, Some(expected.clone()));
        assert_eq!(resources.requests, Some(expected));

        let resources = reloader_resources("0", "0");
        assert_eq!(resources.limits, Some(BTreeMap::new()));
        assert_eq!(resources.requests, Some(BTreeMap::new()));
    }
}
