#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn detect() -> Self {
        let (os, arch) = host_identifiers();
        Self::from_raw(os, arch)
    }

    pub fn from_raw(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_lowercase(),
            arch: translate_arch(arch).to_string(),
        }
    }
}

pub fn translate_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "i386" => "386",
        other => other,
    }
}

/// Host identifiers in `uname` spelling. The Rust target names differ for
/// macOS and 32-bit x86, so those two are converted back.
fn host_identifiers() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "Darwin",
        "linux" => "Linux",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86" => "i386",
        other => other,
    };
    (os, arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_architectures_are_renamed() {
        assert_eq!(translate_arch("x86_64"), "amd64");
        assert_eq!(translate_arch("i386"), "386");
    }

    #[test]
    fn other_architectures_pass_through() {
        for arch in ["aarch64", "arm64", "armv7l", "s390x", "", "AMD64"] {
            assert_eq!(translate_arch(arch), arch);
        }
    }

    #[test]
    fn os_is_lowercased() {
        let p = Platform::from_raw("Linux", "x86_64");
        assert_eq!(
            p,
            Platform {
                os: "linux".to_string(),
                arch: "amd64".to_string()
            }
        );
        assert_eq!(Platform::from_raw("Darwin", "arm64").os, "darwin");
    }

    #[test]
    fn detect_yields_lowercase_os() {
        let p = Platform::detect();
        assert_eq!(p.os, p.os.to_lowercase());
        assert_ne!(p.arch, "x86_64");
    }
}
