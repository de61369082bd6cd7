use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use permission_relay::app::ApiDoc;
use utoipa::OpenApi;

/// Sources whose annotations shape the rendered document.
const WATCHED: &[&str] = &[
    "../permission-relay/src/app.rs",
    "../permission-relay/src/protocol.rs",
    "../permission-relay/src/registry.rs",
    "../error/src/lib.rs",
];

/// Optional second destination, used when exporting the document for client codegen.
const EXPORT_VAR: &str = "PERMISSION_RELAY_OPENAPI_OUT";

fn main() -> Result<(), Box<dyn Error>> {
    for path in WATCHED {
        println!("cargo:rerun-if-changed={path}");
    }
    println!("cargo:rerun-if-env-changed={EXPORT_VAR}");

    let document = ApiDoc::openapi().to_pretty_json()?;

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(out_dir.join("openapi.json"), &document)?;

    if let Some(export) = env::var_os(EXPORT_VAR) {
        let export = PathBuf::from(export);
        if let Some(parent) = export.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&export, &document)?;
        println!("cargo:warning=exported OpenAPI document to {}", export.display());
    }
    Ok(())
}
