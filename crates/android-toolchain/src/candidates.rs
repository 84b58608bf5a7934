//! Candidate installation roots
//!
//! Builds the ordered list of places an Android SDK or JDK might live. Every source
//! contributes an entry even when it yields nothing, so a failed discovery can say
//! exactly where it looked.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::version::{compare_versions, numeric_tuple};

/// A possible installation root and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLocation {
    /// Empty when the source produced no path
    pub path: PathBuf,
    pub provenance: String,
}

impl CandidateLocation {
    pub fn new(path: impl Into<PathBuf>, provenance: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            provenance: provenance.into(),
        }
    }

    /// A source that was consulted but produced nothing.
    pub fn empty(provenance: impl Into<String>) -> Self {
        Self::new(PathBuf::new(), provenance)
    }

    pub fn is_empty(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

/// Operating system family, for well-known install paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// What candidate discovery reads from the host.
pub trait HostEnvironment {
    fn platform(&self) -> Platform;
    fn var(&self, key: &str) -> Option<String>;
    fn home_dir(&self) -> Option<PathBuf>;
    fn local_data_dir(&self) -> Option<PathBuf>;
    /// Resolve an executable on `PATH`, following symlinks.
    fn which(&self, program: &str) -> Option<PathBuf>;
}

/// The real machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostEnvironment for SystemHost {
    fn platform(&self) -> Platform {
        Platform::current()
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    fn local_data_dir(&self) -> Option<PathBuf> {
        dirs::data_local_dir()
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        let found = which::which(program).ok()?;
        Some(std::fs::canonicalize(&found).unwrap_or(found))
    }
}

/// Paths recorded in Xamarin's `monodroid-config.xml`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonodroidConfig {
    pub android_sdk: Option<PathBuf>,
    pub java_sdk: Option<PathBuf>,
}

impl MonodroidConfig {
    /// Parse `<monodroid><android-sdk path=".."/><java-sdk path=".."/></monodroid>`.
    pub fn parse(xml: &str) -> Option<Self> {
        let doc = roxmltree::Document::parse(xml).ok()?;
        let path_of = |tag: &str| {
            doc.descendants()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.attribute("path"))
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        };
        Some(Self {
            android_sdk: path_of("android-sdk"),
            java_sdk: path_of("java-sdk"),
        })
    }

    pub fn file_location(host: &dyn HostEnvironment) -> Option<PathBuf> {
        match host.platform() {
            Platform::Windows => host
                .local_data_dir()
                .map(|d| d.join("Xamarin").join("MonoAndroid").join("monodroid-config.xml")),
            _ => host
                .home_dir()
                .map(|h| h.join(".config").join("xbuild").join("monodroid-config.xml")),
        }
    }

    pub fn load(host: &dyn HostEnvironment) -> Self {
        let Some(path) = Self::file_location(host) else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(xml) => Self::parse(&xml).unwrap_or_else(|| {
                debug!("ignoring malformed {:?}", path);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// Subdirectories of `base`, newest version first.
fn versioned_children(base: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(base) else {
        return Vec::new();
    };
    let mut children: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    let version_of = |p: &Path| {
        p.file_name()
            .and_then(|n| numeric_tuple(&n.to_string_lossy()))
            .unwrap_or_default()
    };
    children.sort_by(|a, b| compare_versions(&version_of(b), &version_of(a)).then_with(|| a.cmp(b)));
    children
}

fn env_candidate(host: &dyn HostEnvironment, key: &str) -> CandidateLocation {
    let provenance = format!("{} environment variable", key);
    match host.var(key) {
        Some(value) => CandidateLocation::new(value.trim(), provenance),
        None => CandidateLocation::empty(provenance),
    }
}

fn explicit_candidate(explicit: Option<&Path>) -> CandidateLocation {
    match explicit {
        Some(path) => CandidateLocation::new(path, "explicit override"),
        None => CandidateLocation::empty("explicit override"),
    }
}

fn monodroid_candidate(path: Option<PathBuf>, what: &str) -> CandidateLocation {
    let provenance = format!("{} in monodroid-config.xml", what);
    match path {
        Some(path) => CandidateLocation::new(path, provenance),
        None => CandidateLocation::empty(provenance),
    }
}

/// Ordered Android SDK candidates: override, environment, well-known paths, package managers.
pub fn android_sdk_candidates(
    host: &dyn HostEnvironment,
    explicit: Option<&Path>,
) -> Vec<CandidateLocation> {
    let mut candidates = vec![
        explicit_candidate(explicit),
        env_candidate(host, "ANDROID_HOME"),
        env_candidate(host, "ANDROID_SDK_ROOT"),
    ];

    let monodroid = MonodroidConfig::load(host);
    candidates.push(monodroid_candidate(monodroid.android_sdk, "android-sdk"));

    let home = host.home_dir();
    match host.platform() {
        Platform::Windows => {
            if let Some(local) = host.local_data_dir() {
                candidates.push(CandidateLocation::new(
                    local.join("Android").join("Sdk"),
                    "Android Studio default location",
                ));
            }
            for var in ["ProgramFiles(x86)", "ProgramFiles"] {
                if let Some(base) = host.var(var) {
                    candidates.push(CandidateLocation::new(
                        PathBuf::from(base).join("Android").join("android-sdk"),
                        format!("Visual Studio location under %{}%", var),
                    ));
                }
            }
        }
        Platform::MacOs => {
            if let Some(home) = &home {
                candidates.push(CandidateLocation::new(
                    home.join("Library").join("Android").join("sdk"),
                    "Android Studio default location",
                ));
                candidates.push(CandidateLocation::new(
                    home.join("Library")
                        .join("Developer")
                        .join("Xamarin")
                        .join("android-sdk-macosx"),
                    "Xamarin default location",
                ));
            }
        }
        Platform::Linux => {
            if let Some(home) = &home {
                candidates.push(CandidateLocation::new(
                    home.join("Android").join("Sdk"),
                    "Android Studio default location",
                ));
            }
        }
    }

    if host.platform() != Platform::Windows {
        for prefix in [
            "/usr/lib/android-sdk",
            "/opt/android-sdk",
            "/usr/local/share/android-sdk",
            "/opt/homebrew/share/android-commandlinetools",
        ] {
            candidates.push(CandidateLocation::new(prefix, "package manager install"));
        }
    }

    candidates
}

/// Ordered JDK candidates: override, environment, well-known paths, `java` on `PATH`.
pub fn jdk_candidates(host: &dyn HostEnvironment, explicit: Option<&Path>) -> Vec<CandidateLocation> {
    let mut candidates = vec![explicit_candidate(explicit), env_candidate(host, "JAVA_HOME")];

    let monodroid = MonodroidConfig::load(host);
    candidates.push(monodroid_candidate(monodroid.java_sdk, "java-sdk"));

    match host.platform() {
        Platform::Windows => {
            if let Some(base) = host.var("ProgramFiles") {
                let base = PathBuf::from(base);
                candidates.push(CandidateLocation::new(
                    base.join("Android").join("Android Studio").join("jbr"),
                    "Android Studio bundled JDK",
                ));
                for vendor in ["Java", "Eclipse Adoptium", "Microsoft", "Zulu"] {
                    for jdk in versioned_children(&base.join(vendor)) {
                        candidates.push(CandidateLocation::new(jdk, format!("{} install", vendor)));
                    }
                }
            }
        }
        Platform::MacOs => {
            candidates.push(CandidateLocation::new(
                "/Applications/Android Studio.app/Contents/jbr/Contents/Home",
                "Android Studio bundled JDK",
            ));
            for jvm in versioned_children(Path::new("/Library/Java/JavaVirtualMachines")) {
                candidates.push(CandidateLocation::new(
                    jvm.join("Contents").join("Home"),
                    "JavaVirtualMachines install",
                ));
            }
        }
        Platform::Linux => {
            candidates.push(CandidateLocation::new(
                "/opt/android-studio/jbr",
                "Android Studio bundled JDK",
            ));
            for jvm in versioned_children(Path::new("/usr/lib/jvm")) {
                candidates.push(CandidateLocation::new(jvm, "package manager install"));
            }
        }
    }

    if let Some(home) = host.home_dir() {
        candidates.push(CandidateLocation::new(
            home.join(".sdkman").join("candidates").join("java").join("current"),
            "SDKMAN current Java",
        ));
    }

    // bin/java -> JDK root
    let from_path = host
        .which("java")
        .and_then(|java| java.parent().and_then(Path::parent).map(Path::to_path_buf));
    candidates.push(match from_path {
        Some(root) => CandidateLocation::new(root, "java on PATH"),
        None => CandidateLocation::empty("java on PATH"),
    });

    candidates
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub(crate) struct FakeHost {
        pub platform: Option<Platform>,
        pub vars: HashMap<String, String>,
        pub home: Option<PathBuf>,
        pub java: Option<PathBuf>,
    }

    impl HostEnvironment for FakeHost {
        fn platform(&self) -> Platform {
            self.platform.unwrap_or(Platform::Linux)
        }
        fn var(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
        fn home_dir(&self) -> Option<PathBuf> {
            self.home.clone()
        }
        fn local_data_dir(&self) -> Option<PathBuf> {
            self.home.as_ref().map(|h| h.join("AppData").join("Local"))
        }
        fn which(&self, _program: &str) -> Option<PathBuf> {
            self.java.clone()
        }
    }

    #[test]
    fn sdk_sources_are_ordered_by_priority() {
        let host = FakeHost {
            vars: HashMap::from([("ANDROID_SDK_ROOT".to_string(), "/env/sdk".to_string())]),
            home: Some(PathBuf::from("/home/dev")),
            ..Default::default()
        };
        let candidates = android_sdk_candidates(&host, Some(Path::new("/explicit/sdk")));

        assert_eq!(candidates[0], CandidateLocation::new("/explicit/sdk", "explicit override"));
        assert!(candidates[1].is_empty());
        assert_eq!(candidates[1].provenance, "ANDROID_HOME environment variable");
        assert_eq!(candidates[2].path, PathBuf::from("/env/sdk"));
        assert_eq!(candidates[3].provenance, "android-sdk in monodroid-config.xml");
        assert_eq!(candidates[4].path, PathBuf::from("/home/dev/Android/Sdk"));
        assert_eq!(
            candidates.last().unwrap().provenance,
            "package manager install"
        );
    }

    #[test]
    fn windows_has_no_package_manager_prefixes() {
        let host = FakeHost {
            platform: Some(Platform::Windows),
            vars: HashMap::from([("ProgramFiles(x86)".to_string(), r"C:\Program Files (x86)".to_string())]),
            home: Some(PathBuf::from(r"C:\Users\dev")),
            ..Default::default()
        };
        let candidates = android_sdk_candidates(&host, None);
        assert!(candidates.iter().all(|c| c.provenance != "package manager install"));
        assert!(candidates
            .iter()
            .any(|c| c.provenance.contains("%ProgramFiles(x86)%")));
    }

    #[test]
    fn monodroid_config_paths_are_used() {
        let home = tempfile::tempdir().unwrap();
        let config_dir = home.path().join(".config").join("xbuild");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("monodroid-config.xml"),
            r#"<?xml version="1.0" encoding="utf-8"?>
<monodroid>
  <android-sdk path="/Users/dev/Library/Developer/Xamarin/android-sdk-macosx" />
  <java-sdk path="/Library/Java/JavaVirtualMachines/microsoft-11.jdk/Contents/Home" />
</monodroid>"#,
        )
        .unwrap();

        let host = FakeHost {
            home: Some(home.path().to_path_buf()),
            ..Default::default()
        };
        let sdk = android_sdk_candidates(&host, None);
        assert_eq!(
            sdk[3].path,
            PathBuf::from("/Users/dev/Library/Developer/Xamarin/android-sdk-macosx")
        );
        let jdk = jdk_candidates(&host, None);
        assert_eq!(
            jdk[2].path,
            PathBuf::from("/Library/Java/JavaVirtualMachines/microsoft-11.jdk/Contents/Home")
        );
    }

    #[test]
    fn malformed_monodroid_config_is_ignored() {
        assert_eq!(MonodroidConfig::parse("<monodroid>"), None);
        assert_eq!(
            MonodroidConfig::parse("<monodroid><android-sdk path=\" \"/></monodroid>"),
            Some(MonodroidConfig::default())
        );
    }

    #[test]
    fn java_on_path_resolves_to_jdk_root() {
        let host = FakeHost {
            java: Some(PathBuf::from("/usr/lib/jvm/java-17-openjdk-amd64/bin/java")),
            ..Default::default()
        };
        let candidates = jdk_candidates(&host, None);
        let last = candidates.last().unwrap();
        assert_eq!(last.provenance, "java on PATH");
        assert_eq!(last.path, PathBuf::from("/usr/lib/jvm/java-17-openjdk-amd64"));
    }

    #[test]
    fn versioned_children_are_newest_first() {
        let base = tempfile::tempdir().unwrap();
        for name in ["jdk-11.0.20", "jdk-17.0.9", "jdk-8u392", "default-java"] {
            std::fs::create_dir(base.path().join(name)).unwrap();
        }
        let names: Vec<String> = versioned_children(base.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names[0], "jdk-17.0.9");
        assert_eq!(names[1], "jdk-11.0.20");
        assert_eq!(names[2], "jdk-8u392");
        assert_eq!(names[3], "default-java");
    }
}
