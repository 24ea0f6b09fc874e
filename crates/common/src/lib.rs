//! Shared helpers for the hub crates: logging setup and small wire types.

pub mod types;
pub mod utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_reports_service_count() {
        let h = types::Health::ok(3);
        assert_eq!(h.status, "ok");
        assert_eq!(h.services, 3);
        let json = serde_json::to_value(&h).expect("serialize");
        assert_eq!(json["services"], 3);
    }
}
