//! NSS library and profile discovery.
//!
//! Finds a PKCS#11 softoken library (env override, then Firefox
//! `compatibility.ini`, then well-known per-OS paths; first match wins) and
//! candidate NSS profile directories: the shared `~/.pki/nssdb`, Firefox
//! profiles via `profiles.ini` (locked install default first, then the
//! explicit default, then most recently modified), Chromium-family config
//! bases, and a bounded walk for stray `cert9.db`/`cert8.db` directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Environment variables naming the PKCS#11 library, highest precedence.
pub const NSS_LIB_ENV_VARS: [&str; 2] = ["VOCSIGN_NSS_LIB", "NSS_LIB_PATH"];

/// One scannable NSS certificate database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NssStore {
    pub lib_path: PathBuf,
    pub profile_dir: PathBuf,
    pub label: String,
}

/// Discover every scannable NSS store on this machine. Empty when no
/// PKCS#11 library can be located.
pub fn discover_nss_stores() -> Vec<NssStore> {
    let Some(lib_path) = find_nss_lib() else {
        log::debug!("no NSS PKCS#11 library found, skipping NSS discovery");
        return Vec::new();
    };

    let mut stores = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut add = |profile_dir: PathBuf, label: String| {
        if !has_cert_db(&profile_dir) {
            return;
        }
        if !seen.insert(profile_dir.clone()) {
            return;
        }
        stores.push(NssStore {
            lib_path: lib_path.clone(),
            profile_dir,
            label,
        });
    };

    let home = home_dir();

    // 1. Shared NSS DB.
    add(home.join(".pki").join("nssdb"), "System NSS".to_string());

    // 2. Firefox profiles, active profile first.
    for (i, profile) in discover_firefox_profile_dirs().into_iter().enumerate() {
        let label = if i == 0 {
            "Firefox Active Profile".to_string()
        } else {
            format!("Firefox Profile {}", i + 1)
        };
        add(profile, label);
    }

    // 3. Chromium-family bases and their named profiles.
    for base in chromium_base_dirs() {
        add(base.clone(), "Browser NSS".to_string());
        if let Ok(entries) = fs::read_dir(&base) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_dir() && (name == "Default" || name.starts_with("Profile ")) {
                    add(entry.path(), format!("Browser Profile: {name}"));
                }
            }
        }
    }

    // 4. Bounded walk under user-config roots for anything missed above.
    for root in walk_roots() {
        walk_for_cert_dbs(&root, 3, &mut |dir| {
            add(dir.to_path_buf(), "NSS Database".to_string());
        });
    }

    stores
}

/// Locate the softoken PKCS#11 library. Precedence: env override, Firefox
/// `compatibility.ini` `LastPlatformDir`, platform default paths.
pub fn find_nss_lib() -> Option<PathBuf> {
    for var in NSS_LIB_ENV_VARS {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                let path = PathBuf::from(value);
                if path.exists() {
                    return Some(path);
                }
            }
        }
    }

    if let Some(path) = find_nss_lib_from_firefox_compatibility() {
        return Some(path);
    }

    platform_default_lib_paths().into_iter().find(|p| p.exists())
}

fn platform_default_lib_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        let program_files = std::env::var("ProgramFiles").unwrap_or_default();
        let program_files_x86 = std::env::var("ProgramFiles(x86)").unwrap_or_default();
        [&program_files, &program_files_x86]
            .iter()
            .filter(|base| !base.is_empty())
            .flat_map(|base| {
                [
                    Path::new(base).join("Mozilla Firefox").join("softokn3.dll"),
                    Path::new(base).join("Mozilla Firefox").join("nss3.dll"),
                ]
            })
            .collect()
    } else if cfg!(target_os = "macos") {
        vec![
            PathBuf::from("/Applications/Firefox.app/Contents/MacOS/libsoftokn3.dylib"),
            PathBuf::from("/Applications/Firefox.app/Contents/MacOS/libnss3.dylib"),
            PathBuf::from("/usr/local/lib/libsoftokn3.dylib"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/lib/x86_64-linux-gnu/libsoftokn3.so"),
            PathBuf::from("/usr/lib/libsoftokn3.so"),
            PathBuf::from("/usr/lib64/libsoftokn3.so"),
            PathBuf::from("/usr/lib/x86_64-linux-gnu/nss/libsoftokn3.so"),
        ]
    }
}

fn find_nss_lib_from_firefox_compatibility() -> Option<PathBuf> {
    for profile in discover_firefox_profile_dirs() {
        let compat = profile.join("compatibility.ini");
        let Ok(content) = fs::read_to_string(&compat) else {
            continue;
        };
        let last_platform_dir = content.lines().find_map(|line| {
            line.trim()
                .strip_prefix("LastPlatformDir=")
                .map(|v| v.trim().to_string())
        });
        let Some(dir) = last_platform_dir.filter(|d| !d.is_empty()) else {
            continue;
        };
        for name in [
            "softokn3.dll",
            "nss3.dll",
            "libsoftokn3.dylib",
            "libnss3.dylib",
            "libsoftokn3.so",
            "libnss3.so",
        ] {
            let candidate = Path::new(&dir).join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

#[derive(Debug, Default, Clone)]
struct FirefoxProfile {
    rel_path: String,
    abs_path: PathBuf,
    is_relative: bool,
    is_default: bool,
    locked: bool,
    mod_time: Option<SystemTime>,
}

#[derive(Debug, Default, Clone)]
struct FirefoxInstall {
    default_path: String,
    locked: bool,
}

/// Firefox (and Firefox-derivative) profile directories, active profile
/// first, deduplicated.
pub fn discover_firefox_profile_dirs() -> Vec<PathBuf> {
    let mut ordered = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut add = |p: PathBuf| {
        if !is_nss_profile_dir(&p) {
            return;
        }
        if seen.insert(p.clone()) {
            ordered.push(p);
        }
    };

    for base in firefox_base_dirs() {
        let (mut profiles, installs) = parse_profiles_ini(&base.join("profiles.ini"));

        if let Some(active) = resolve_active_profile(&profiles, &installs) {
            add(active);
        }

        profiles.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.mod_time.cmp(&a.mod_time))
        });
        for profile in &profiles {
            add(profile.abs_path.clone());
        }

        // Fallback: any profile-shaped subdirectory of the base.
        if let Ok(entries) = fs::read_dir(&base) {
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    add(entry.path());
                }
            }
        }
    }
    ordered
}

fn parse_profiles_ini(ini_path: &Path) -> (Vec<FirefoxProfile>, Vec<FirefoxInstall>) {
    let Ok(content) = fs::read_to_string(ini_path) else {
        return (Vec::new(), Vec::new());
    };
    let base_dir = ini_path.parent().unwrap_or(Path::new("."));

    let mut profiles: Vec<(String, FirefoxProfile)> = Vec::new();
    let mut installs: Vec<(String, FirefoxInstall)> = Vec::new();
    let mut section = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_ascii_lowercase();
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if section.starts_with("profile") {
            let index = profiles
                .iter()
                .position(|(s, _)| *s == section)
                .unwrap_or_else(|| {
                    profiles.push((
                        section.clone(),
                        FirefoxProfile {
                            is_relative: true,
                            ..FirefoxProfile::default()
                        },
                    ));
                    profiles.len() - 1
                });
            let profile = &mut profiles[index].1;
            match key.as_str() {
                "path" => profile.rel_path = value.to_string(),
                "isrelative" => profile.is_relative = value == "1",
                "default" => profile.is_default = value == "1",
                _ => {}
            }
        } else if section.starts_with("install") {
            let index = installs
                .iter()
                .position(|(s, _)| *s == section)
                .unwrap_or_else(|| {
                    installs.push((section.clone(), FirefoxInstall::default()));
                    installs.len() - 1
                });
            let install = &mut installs[index].1;
            match key.as_str() {
                "default" => install.default_path = value.to_string(),
                "locked" => install.locked = value == "1",
                _ => {}
            }
        }
    }

    let profiles = profiles
        .into_iter()
        .filter(|(_, p)| !p.rel_path.is_empty())
        .map(|(_, mut p)| {
            p.abs_path = if p.is_relative {
                base_dir.join(&p.rel_path)
            } else {
                PathBuf::from(&p.rel_path)
            };
            p.mod_time = fs::metadata(&p.abs_path).and_then(|m| m.modified()).ok();
            p.locked = profile_locked(&p.abs_path);
            p
        })
        .collect();
    let installs = installs.into_iter().map(|(_, i)| i).collect();
    (profiles, installs)
}

fn profile_locked(profile_dir: &Path) -> bool {
    profile_dir.join("parent.lock").exists()
        || profile_dir.join("lock").exists()
        || fs::symlink_metadata(profile_dir.join("lock"))
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
}

/// Locked install default → locked profile → explicit default → newest.
fn resolve_active_profile(
    profiles: &[FirefoxProfile],
    installs: &[FirefoxInstall],
) -> Option<PathBuf> {
    for install in installs {
        if !install.locked || install.default_path.is_empty() {
            continue;
        }
        if let Some(p) = profiles.iter().find(|p| p.rel_path == install.default_path) {
            if is_nss_profile_dir(&p.abs_path) {
                return Some(p.abs_path.clone());
            }
        }
    }
    for p in profiles {
        if p.locked && is_nss_profile_dir(&p.abs_path) {
            return Some(p.abs_path.clone());
        }
    }
    for p in profiles {
        if p.is_default && is_nss_profile_dir(&p.abs_path) {
            return Some(p.abs_path.clone());
        }
    }
    profiles
        .iter()
        .filter(|p| is_nss_profile_dir(&p.abs_path))
        .max_by_key(|p| p.mod_time)
        .map(|p| p.abs_path.clone())
}

/// A directory counts as an NSS profile when it has a certificate database
/// (modern `cert9.db` or legacy `cert8.db`), optionally with a key database.
pub fn is_nss_profile_dir(dir: &Path) -> bool {
    let has_cert9 = dir.join("cert9.db").exists();
    let has_cert8 = dir.join("cert8.db").exists();
    if !has_cert9 && !has_cert8 {
        return false;
    }
    if dir.join("key4.db").exists() || dir.join("key3.db").exists() {
        return true;
    }
    // Minimal profiles may have no key db yet; accept cert9.db alone.
    has_cert9
}

fn has_cert_db(dir: &Path) -> bool {
    dir.join("cert9.db").exists() || dir.join("cert8.db").exists()
}

fn firefox_base_dirs() -> Vec<PathBuf> {
    let home = home_dir();
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("AppData").join("Roaming"));
        vec![appdata.join("Mozilla").join("Firefox")]
    } else if cfg!(target_os = "macos") {
        vec![home
            .join("Library")
            .join("Application Support")
            .join("Firefox")]
    } else {
        let mut bases = vec![
            home.join(".mozilla").join("firefox"),
            home.join("snap/firefox/common/.mozilla/firefox"),
            home.join(".var/app/org.mozilla.firefox/.mozilla/firefox"),
            home.join(".var/app/org.mozilla.firefox_esr/.mozilla/firefox"),
            home.join(".var/app/io.gitlab.librewolf-community/.librewolf"),
            home.join(".librewolf"),
            home.join(".waterfox"),
            home.join(".var/app/net.waterfox.waterfox/.waterfox"),
            home.join(".local/share/torbrowser/tbb/x86_64/tor-browser/Browser/TorBrowser/Data/Browser"),
            home.join("tor-browser/Browser/TorBrowser/Data/Browser"),
            home.join(".thunderbird"),
            home.join("snap/thunderbird/common/.thunderbird"),
            home.join(".var/app/org.mozilla.Thunderbird/.thunderbird"),
        ];
        // Any snap that looks like a Firefox variant.
        bases.extend(snap_dirs_matching(&home, "firefox", "common/.mozilla/firefox"));
        bases
    }
}

fn chromium_base_dirs() -> Vec<PathBuf> {
    let home = home_dir();
    if cfg!(windows) {
        let local = std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("AppData").join("Local"));
        vec![
            local.join("Google/Chrome/User Data"),
            local.join("Google/Chrome SxS/User Data"),
            local.join("BraveSoftware/Brave-Browser/User Data"),
            local.join("Chromium/User Data"),
            local.join("Microsoft/Edge/User Data"),
            local.join("Vivaldi/User Data"),
        ]
    } else if cfg!(target_os = "macos") {
        let app_support = home.join("Library").join("Application Support");
        vec![
            app_support.join("Google/Chrome"),
            app_support.join("Google/Chrome Canary"),
            app_support.join("BraveSoftware/Brave-Browser"),
            app_support.join("Chromium"),
            app_support.join("Microsoft Edge"),
            app_support.join("Vivaldi"),
        ]
    } else {
        let cfg_dir = home.join(".config");
        let mut bases = vec![
            cfg_dir.join("google-chrome"),
            cfg_dir.join("google-chrome-beta"),
            cfg_dir.join("google-chrome-unstable"),
            cfg_dir.join("BraveSoftware/Brave-Browser"),
            cfg_dir.join("chromium"),
            cfg_dir.join("microsoft-edge"),
            cfg_dir.join("opera"),
            cfg_dir.join("vivaldi"),
            home.join("snap/brave/common/.pki/nssdb"),
            home.join("snap/chromium/common/chromium"),
            home.join(".var/app/com.google.Chrome/config/google-chrome"),
            home.join(".var/app/com.brave.Browser/config/BraveSoftware/Brave-Browser"),
            home.join(".var/app/org.chromium.Chromium/config/chromium"),
            home.join(".var/app/com.microsoft.Edge/config/microsoft-edge"),
        ];
        bases.extend(snap_dirs_matching(&home, "chromium", "common/chromium"));
        bases
    }
}

/// `~/snap/<prefix>*/<suffix>` directories.
fn snap_dirs_matching(home: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(home.join("snap")) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with(prefix) {
                let candidate = entry.path().join(suffix);
                if candidate.is_dir() {
                    out.push(candidate);
                }
            }
        }
    }
    out
}

fn walk_roots() -> Vec<PathBuf> {
    let home = home_dir();
    if cfg!(windows) {
        vec![std::env::var("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("AppData").join("Roaming"))]
    } else if cfg!(target_os = "macos") {
        vec![home.join("Library").join("Application Support")]
    } else {
        vec![home.join(".config"), home.join(".pki")]
    }
}

/// Depth-bounded walk invoking `found` on every directory holding a cert db.
fn walk_for_cert_dbs(dir: &Path, depth_left: usize, found: &mut dyn FnMut(&Path)) {
    if has_cert_db(dir) {
        found(dir);
    }
    if depth_left == 0 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && !path.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')) {
            walk_for_cert_dbs(&path, depth_left - 1, found);
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
