//! Path helpers.

use camino::Utf8PathBuf;

/// Resolves a user-supplied path, replacing a leading `~` or `~/` with the
/// home directory. Paths are returned unchanged when `HOME` is unset.
///
/// ```
/// # use oracluster::util::expand_home;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_home("~/.oracledba"), format!("{home}/.oracledba"));
/// assert_eq!(expand_home("/etc/oracluster"), "/etc/oracluster");
/// ```
#[must_use]
pub fn expand_home(path: &str) -> Utf8PathBuf {
    let Some(raw_home) = std::env::var_os("HOME") else {
        return Utf8PathBuf::from(path);
    };
    let home = Utf8PathBuf::from(raw_home.to_string_lossy().into_owned());
    match path.strip_prefix('~') {
        Some("") => home,
        Some(rest) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => Utf8PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;

    #[tokio::test]
    async fn only_a_leading_home_marker_is_expanded() {
        let _guard = EnvGuard::set_vars(&[("HOME", "/home/dba")]).await;

        assert_eq!(expand_home("~"), "/home/dba");
        assert_eq!(expand_home("~/keys/id_rsa"), "/home/dba/keys/id_rsa");
        assert_eq!(expand_home("~oracle/keys"), "~oracle/keys");
        assert_eq!(expand_home("keys/~/id_rsa"), "keys/~/id_rsa");
    }
}
