//! Boot-script parameter assembly for the transfer instances.
//!
//! The script bodies are opaque templates supplied by the caller; this
//! module only substitutes named `@parameter@` tokens. The `@` sigil avoids
//! colliding with shell `${…}` expansion inside the templates.

use std::collections::BTreeMap;

use crate::secret::TransferSecret;

/// Template token carrying the base64 transfer secret.
pub const PARAM_SECRET: &str = "secret";
/// Template token carrying the download URL of the transfer server tool.
pub const PARAM_SERVER_URL: &str = "server_url";
/// Template token carrying the download URL of the transfer client tool.
pub const PARAM_CLIENT_URL: &str = "client_url";
/// Template token carrying the source instance's public address. Only set
/// once the source transfer instance is up, so only the destination script
/// can reference it.
pub const PARAM_PEER: &str = "peer";

/// Named values injected into the transient instances' boot scripts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BootstrapParams {
    values: BTreeMap<String, String>,
}

impl BootstrapParams {
    /// Starts a parameter set seeded with the transfer secret.
    #[must_use]
    pub fn new(secret: &TransferSecret) -> Self {
        let mut params = Self::default();
        params.set(PARAM_SECRET, secret.encoded());
        params
    }

    /// Sets or replaces one named parameter.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_owned(), value.into());
    }

    /// Returns the value of a parameter, when set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Substitutes every known `@name@` token in `template`.
    ///
    /// Unknown tokens are left untouched; the template body is opaque and
    /// may legitimately contain `@` characters of its own.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut rendered = template.to_owned();
        for (name, value) in &self.values {
            rendered = rendered.replace(&format!("@{name}@"), value);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params_with_secret() -> BootstrapParams {
        let secret = TransferSecret::generate(64).expect("secret generation");
        BootstrapParams::new(&secret)
    }

    #[rstest]
    fn substitutes_known_tokens() {
        let mut params = params_with_secret();
        params.set(PARAM_SERVER_URL, "https://example.test/server");
        params.set(PARAM_PEER, "host.example.test");

        let rendered =
            params.render("curl @server_url@ && connect @peer@ with @secret@");

        assert!(rendered.contains("https://example.test/server"));
        assert!(rendered.contains("host.example.test"));
        assert!(!rendered.contains("@server_url@"));
        assert!(!rendered.contains("@secret@"));
    }

    #[rstest]
    fn leaves_unknown_tokens_untouched() {
        let params = params_with_secret();
        let rendered = params.render("echo @not_a_param@ user@host");
        assert!(rendered.contains("@not_a_param@"));
        assert!(rendered.contains("user@host"));
    }

    #[rstest]
    fn later_values_replace_earlier_ones() {
        let mut params = params_with_secret();
        params.set(PARAM_PEER, "first");
        params.set(PARAM_PEER, "second");
        assert_eq!(params.get(PARAM_PEER), Some("second"));
    }
}
