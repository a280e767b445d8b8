use stackable_operator::k8s_openapi::{api::core::v1::Container, DeepMerge};

/// Overlays `patches` onto `containers`, keyed by container name.
///
/// A patch for an existing name is merged with Kubernetes merge semantics: fields the patch leaves
/// unset keep their value, keyed lists such as `env` or `volumeMounts` are merged by key. Patches
/// with a new name are appended in the given order, later patches see the result of earlier ones.
pub fn merge_containers(mut containers: Vec<Container>, patches: &[Container]) -> Vec<Container> {
    for patch in patches {
        match containers
            .iter_mut()
            .find(|container| container.name == patch.name)
        {
            Some(existing) => {
                tracing::debug!(container.name = %patch.name, "Merging user supplied container");
                existing.merge_from(patch.clone());
            }
            None => {
                tracing::debug!(container.name = %patch.name, "Adding user supplied container");
                containers.push(patch.clone());
            }
        }
    }
    containers
}
