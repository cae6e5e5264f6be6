use crate::error::RunError;
use crate::logger::RunLogger;
use crate::transport::Transport;

pub const REPO_URL: &str = "https://github.com/aelsabbahy/goss";
pub const LATEST: &str = "latest";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionState {
    #[default]
    Unresolved,
    Resolved(String),
}

impl VersionState {
    pub fn resolve(
        &mut self,
        requested: &str,
        transport: &dyn Transport,
        log: &RunLogger,
    ) -> Result<String, RunError> {
        if let VersionState::Resolved(v) = self {
            return Ok(v.clone());
        }
        let version = resolve_version(requested, transport, log)?;
        *self = VersionState::Resolved(version.clone());
        Ok(version)
    }

    pub fn get(&self) -> Option<&str> {
        match self {
            VersionState::Resolved(v) => Some(v.as_str()),
            VersionState::Unresolved => None,
        }
    }
}

pub fn resolve_version(
    requested: &str,
    transport: &dyn Transport,
    log: &RunLogger,
) -> Result<String, RunError> {
    if requested != LATEST {
        return Ok(requested.to_string());
    }
    let version = latest_version(transport)?;
    log.info(format_args!(
        "Detected latest available Goss version as {}",
        version
    ));
    Ok(version)
}

fn latest_version(transport: &dyn Transport) -> Result<String, RunError> {
    let fetched = transport
        .get(&format!("{}/releases/latest", REPO_URL))
        .map_err(|e| RunError::Resolution(format!("{e:#}")))?;
    if fetched.status != 200 {
        return Err(RunError::Resolution(format!(
            "HTTP status {}",
            fetched.status
        )));
    }
    // final URL looks like https://github.com/aelsabbahy/goss/releases/tag/v0.3.6
    let tag = fetched
        .final_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let version = tag_to_version(tag);
    if version.is_empty() {
        return Err(RunError::Resolution(format!(
            "no release tag in {}",
            fetched.final_url
        )));
    }
    Ok(version.to_string())
}

pub fn tag_to_version(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::StubTransport;

    fn latest_stub(status: u16, final_url: &str) -> StubTransport {
        StubTransport::default().route(
            "https://github.com/aelsabbahy/goss/releases/latest",
            status,
            final_url,
            b"",
        )
    }

    #[test]
    fn explicit_version_skips_network() {
        let transport = StubTransport::default();
        let log = RunLogger::new(false);
        let v = resolve_version("v0.3.6", &transport, &log).expect("explicit");
        assert_eq!(v, "v0.3.6");
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn latest_reads_tag_from_redirect() {
        let transport = latest_stub(
            200,
            "https://github.com/aelsabbahy/goss/releases/tag/v0.3.6",
        );
        let log = RunLogger::new(false);
        let v = resolve_version(LATEST, &transport, &log).expect("latest");
        assert_eq!(v, "0.3.6");
        assert!(log
            .buffered_lines()
            .contains(&"[INFO ] Detected latest available Goss version as 0.3.6".to_string()));
    }

    #[test]
    fn tag_without_v_is_kept() {
        assert_eq!(tag_to_version("0.4.1"), "0.4.1");
        assert_eq!(tag_to_version("v0.4.1"), "0.4.1");
    }

    #[test]
    fn non_200_is_resolution_error() {
        let transport = latest_stub(404, "https://github.com/aelsabbahy/goss/releases/latest");
        let log = RunLogger::new(false);
        let err = resolve_version(LATEST, &transport, &log).expect_err("404");
        assert!(matches!(err, RunError::Resolution(ref m) if m.contains("404")));
    }

    #[test]
    fn transport_failure_is_resolution_error() {
        let transport = StubTransport::default();
        let log = RunLogger::new(false);
        let err = resolve_version(LATEST, &transport, &log).expect_err("refused");
        assert!(matches!(err, RunError::Resolution(_)));
    }

    #[test]
    fn state_memoizes_latest_lookup() {
        let transport = latest_stub(
            200,
            "https://github.com/aelsabbahy/goss/releases/tag/v0.3.9",
        );
        let log = RunLogger::new(false);
        let mut state = VersionState::default();
        assert_eq!(state.get(), None);
        assert_eq!(state.resolve(LATEST, &transport, &log).expect("first"), "0.3.9");
        assert_eq!(state.resolve(LATEST, &transport, &log).expect("second"), "0.3.9");
        assert_eq!(transport.request_count(), 1);
        assert_eq!(state, VersionState::Resolved("0.3.9".to_string()));
    }

    #[test]
    fn failed_lookup_leaves_state_unresolved() {
        let transport = latest_stub(500, "");
        let log = RunLogger::new(false);
        let mut state = VersionState::default();
        assert!(state.resolve(LATEST, &transport, &log).is_err());
        assert_eq!(state, VersionState::Unresolved);
    }
}
