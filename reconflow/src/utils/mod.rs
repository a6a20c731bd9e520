//! Naming, identifier and timestamp helpers.

mod naming;

pub use naming::{timestamp_run_tag, validate_resource_name, NamingPolicy, MAX_NAME_LEN};

use uuid::Uuid;

/// Generates a new run identifier.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_v4() {
        let id = generate_run_id();
        assert_eq!(id.get_version_num(), 4);
        assert_ne!(id, generate_run_id());
    }
}
