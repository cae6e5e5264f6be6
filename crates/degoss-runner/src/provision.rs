use crate::error::RunError;
use crate::fsutil::set_mode;
use crate::logger::RunLogger;
use crate::transport::Transport;
use crate::version::REPO_URL;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

pub const BUFFER_SIZE: usize = 8192;

pub fn release_url(version: &str, os: &str, arch: &str) -> String {
    format!(
        "{}/releases/download/v{}/goss-{}-{}",
        REPO_URL, version, os, arch
    )
}

pub fn provision(
    transport: &dyn Transport,
    version: &str,
    os: &str,
    arch: &str,
    executable: &Path,
    expected_sha256: Option<&str>,
    log: &RunLogger,
) -> Result<(), RunError> {
    let url = release_url(version, os, arch);
    log.info(format_args!(
        "Installing the Goss binary from {} into {}",
        url,
        executable
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    ));

    let fetched = transport
        .get(&url)
        .map_err(|e| RunError::Download(format!("{e:#}")))?;
    if fetched.status != 200 {
        return Err(RunError::Download(format!(
            "HTTP status {} for {}",
            fetched.status, url
        )));
    }

    let digest = stream_to_file(fetched.body, executable)
        .map_err(|e| RunError::Download(format!("write {}: {}", executable.display(), e)))?;

    if let Some(expected) = expected_sha256 {
        if !digest.eq_ignore_ascii_case(expected.trim()) {
            let _ = fs::remove_file(executable);
            return Err(RunError::Download(format!(
                "sha256 mismatch for {}: expected {}, got {}",
                url,
                expected.trim(),
                digest
            )));
        }
        log.debug(format_args!("Verified sha256 {}", digest));
    }

    if matches!(os, "linux" | "darwin") {
        set_mode(executable, 0o700).map_err(|e| RunError::Download(format!("{e:#}")))?;
    }

    log.debug(format_args!(
        "Successfully installed the binary to {}",
        executable.display()
    ));
    Ok(())
}

fn stream_to_file(mut body: Box<dyn Read>, dest: &Path) -> std::io::Result<String> {
    let mut file = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
    }
    file.flush()?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::unique_test_dir;
    use crate::transport::testing::StubTransport;

    const URL: &str = "https://github.com/aelsabbahy/goss/releases/download/v0.3.6/goss-linux-amd64";

    #[test]
    fn release_url_format() {
        assert_eq!(release_url("0.3.6", "linux", "amd64"), URL);
    }

    #[test]
    fn downloads_large_body_and_sets_owner_only_mode() {
        let root = unique_test_dir("provision_ok");
        fs::create_dir_all(&root).expect("root");
        let exe = root.join("goss");
        let body: Vec<u8> = (0..(BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let transport = StubTransport::default().route(URL, 200, URL, &body);
        let log = RunLogger::new(true);

        provision(&transport, "0.3.6", "linux", "amd64", &exe, None, &log).expect("provision");

        assert_eq!(fs::read(&exe).expect("read"), body);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = fs::metadata(&exe).expect("meta").permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn non_200_is_download_error_and_writes_nothing() {
        let root = unique_test_dir("provision_404");
        fs::create_dir_all(&root).expect("root");
        let exe = root.join("goss");
        let transport = StubTransport::default().route(URL, 404, URL, b"not found");
        let log = RunLogger::new(false);

        let err = provision(&transport, "0.3.6", "linux", "amd64", &exe, None, &log)
            .expect_err("404");
        assert!(matches!(err, RunError::Download(ref m) if m.contains("404")));
        assert!(!exe.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_target_directory_is_download_error() {
        let root = unique_test_dir("provision_nodir");
        let exe = root.join("bin").join("goss");
        let transport = StubTransport::default().route(URL, 200, URL, b"#!/bin/sh\n");
        let log = RunLogger::new(false);

        let err = provision(&transport, "0.3.6", "linux", "amd64", &exe, None, &log)
            .expect_err("no dir");
        assert!(matches!(err, RunError::Download(_)));
    }

    #[test]
    fn digest_mismatch_removes_file() {
        let root = unique_test_dir("provision_sha");
        fs::create_dir_all(&root).expect("root");
        let exe = root.join("goss");
        let transport = StubTransport::default().route(URL, 200, URL, b"abc");
        let log = RunLogger::new(false);

        let err = provision(&transport, "0.3.6", "linux", "amd64", &exe, Some("00ff"), &log)
            .expect_err("mismatch");
        assert!(matches!(err, RunError::Download(ref m) if m.contains("sha256 mismatch")));
        assert!(!exe.exists());

        let good = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        provision(&transport, "0.3.6", "linux", "amd64", &exe, Some(good), &log)
            .expect("matching digest");
        assert!(exe.exists());
        let _ = fs::remove_dir_all(root);
    }
}
