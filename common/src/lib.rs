pub mod args;
pub mod redis;
pub mod shutdown;

pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

pub mod annotations {
    pub const STABLE_ID: &str = "dorch.beebs.dev/stable-id";
    pub const CREATED_BY: &str = "dorch.beebs.dev/created-by";
    pub const CREATED_BY_USER: &str = "dorch.beebs.dev/created-by-user";
    pub const SPEC_HASH: &str = "dorch.beebs.dev/spec-hash";
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}
