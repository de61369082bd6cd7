//! OpenAPI document of the relay's HTTP API, rendered at build time.

pub const OPENAPI_JSON: &str = include_str!(concat!(env!("OUT_DIR"), "/openapi.json"));

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> serde_json::Value {
        serde_json::from_str(OPENAPI_JSON).expect("valid json")
    }

    #[test]
    fn document_lists_permission_routes() {
        let doc = document();
        let paths = doc["paths"].as_object().expect("paths");
        assert!(paths.contains_key("/v1/permissions"));
        assert!(paths.contains_key("/v1/permissions/decision"));
        assert!(paths.contains_key("/v1/health"));
    }

    #[test]
    fn problem_details_schema_and_server_are_present() {
        let doc = document();
        assert!(doc["components"]["schemas"]["ProblemDetails"].is_object());
        assert_eq!(doc["servers"][0]["url"], "http://localhost:8765");
        assert!(doc["paths"]["/v1/permissions"]["post"]["responses"]["415"].is_object());
    }
}
