fn main() {
    if let Err(err) = permission_relay::cli::run_permission_relay() {
        tracing::error!(error = %err, "permission-relay failed");
        std::process::exit(1);
    }
}
