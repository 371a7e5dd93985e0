//! User-agent string for requests made on behalf of the verifier.

use crate::config::ClientEnvironment;

/// Default client name.
pub const DEFAULT_CLIENT_NAME: &str = "NuGet Signing";

/// User agent builder.
#[derive(Debug, Clone)]
pub struct UserAgent {
    client_name: String,
    version: String,
    os: String,
    arch: String,
    test_mode: bool,
}

impl UserAgent {
    /// Start from the crate version and the running platform.
    pub fn builder(client_name: impl Into<String>, env: &ClientEnvironment) -> Self {
        Self {
            client_name: client_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            test_mode: env.test_mode(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_os(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    /// Render `<client>/<version> (<os>, <arch>)`.
    pub fn build(&self) -> String {
        let mut agent = format!(
            "{}/{} ({}, {})",
            self.client_name, self.version, self.os, self.arch
        );
        if self.test_mode {
            agent.push_str(" (test mode)");
        }
        agent
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self::builder(DEFAULT_CLIENT_NAME, &ClientEnvironment::default())
    }
}
