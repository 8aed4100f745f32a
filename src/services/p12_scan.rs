//! Bounded filesystem walk for loose .p12/.pfx files.
//!
//! Looks through the usual user locations (desktop, downloads, PKI dirs,
//! browser-export spots) for certificate files the user never imported.
//! The walk is bounded in depth, result count, file size, and file age, all
//! tunable through `VOCSIGN_P12_*` environment variables.

use crate::domain::identity::{Identity, SystemIdentity, SystemProvenance};
use crate::infra::context::Context;
use crate::infra::error::{SignerError, SignerResult};
use crate::services::pkcs12;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const DEFAULT_MAX_DEPTH: usize = 5;
const DEFAULT_MAX_RESULTS: usize = 200;
const DEFAULT_MAX_SIZE_MB: u64 = 5;
const DEFAULT_MAX_AGE_YEARS: u64 = 10;

/// Outcome of a candidate walk: importable passwordless identities plus the
/// paths of password-protected files the user could import manually.
#[derive(Debug, Default)]
pub struct LooseP12Scan {
    pub identities: Vec<SystemIdentity>,
    pub locked: Vec<PathBuf>,
}

/// Find candidate .p12/.pfx files under the per-OS user roots.
pub fn find_candidates(ctx: &Context) -> Vec<PathBuf> {
    let max_depth = env_usize("VOCSIGN_P12_MAX_DEPTH", DEFAULT_MAX_DEPTH);
    let limit = env_usize("VOCSIGN_P12_MAX_RESULTS", DEFAULT_MAX_RESULTS);
    let max_size = env_usize("VOCSIGN_P12_MAX_SIZE_MB", DEFAULT_MAX_SIZE_MB as usize) as u64
        * 1024
        * 1024;
    let max_age_years = env_usize("VOCSIGN_P12_MAX_AGE_YEARS", DEFAULT_MAX_AGE_YEARS as usize);
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(max_age_years as u64 * 365 * 24 * 3600));

    let mut roots = scan_roots();
    if let Ok(extra) = std::env::var("VOCSIGN_P12_EXTRA_ROOTS") {
        let sep = if cfg!(windows) { ';' } else { ':' };
        roots.extend(
            extra
                .split(sep)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        );
    }

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for root in roots {
        if ctx.is_cancelled() || results.len() >= limit {
            break;
        }
        if !root.exists() {
            continue;
        }
        walk(
            ctx,
            &root,
            0,
            max_depth,
            max_size,
            cutoff,
            limit,
            &mut seen,
            &mut results,
        );
    }
    results
}

/// Parse every candidate with the empty password; protected files land in
/// `locked`, unreadable ones are skipped with a debug log.
pub fn scan(ctx: &Context) -> LooseP12Scan {
    let mut out = LooseP12Scan::default();
    for path in find_candidates(ctx) {
        if ctx.is_cancelled() {
            break;
        }
        match parse_metadata(&path, "") {
            Ok(identity) => out.identities.push(identity),
            Err(SignerError::PasswordRequired) => {
                log::debug!("PKCS#12 file requires password, skipping: {}", path.display());
                out.locked.push(path);
            }
            Err(e) => log::debug!("PKCS#12 parse skipped for {}: {e}", path.display()),
        }
    }
    out
}

/// Read one PKCS#12 file into a system identity.
pub fn parse_metadata(path: &Path, password: &str) -> SignerResult<SystemIdentity> {
    let data = fs::read(path)?;
    let parsed = pkcs12::parse(&data, password)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let fingerprint = parsed.cert.fingerprint();
    Ok(SystemIdentity {
        identity: Identity {
            id: format!("file:{}", path.display()),
            friendly_name: format!("File: {file_name}"),
            cert: parsed.cert,
            chain: parsed.chain,
            fingerprint,
        },
        provenance: SystemProvenance::LooseP12 {
            path: path.to_path_buf(),
        },
    })
}

#[allow(clippy::too_many_arguments)]
fn walk(
    ctx: &Context,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    max_size: u64,
    cutoff: Option<SystemTime>,
    limit: usize,
    seen: &mut HashSet<PathBuf>,
    results: &mut Vec<PathBuf>,
) {
    if ctx.is_cancelled() || results.len() >= limit {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        if ctx.is_cancelled() || results.len() >= limit {
            return;
        }
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };

        if file_type.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            if depth + 1 <= max_depth && !should_skip_dir(&name, depth + 1) {
                walk(
                    ctx,
                    &path,
                    depth + 1,
                    max_depth,
                    max_size,
                    cutoff,
                    limit,
                    seen,
                    results,
                );
            }
            continue;
        }

        if !has_p12_extension(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.len() == 0 || meta.len() > max_size {
            continue;
        }
        if let (Some(cutoff), Ok(modified)) = (cutoff, meta.modified()) {
            if modified < cutoff {
                continue;
            }
        }
        if seen.insert(path.clone()) {
            results.push(path);
        }
    }
}

fn scan_roots() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let mut roots = vec![
        // Most likely locations first.
        home.join("Desktop"),
        home.join("Downloads"),
        home.join("Documents"),
        // PKI / certificate-specific dirs.
        home.join(".pki"),
        home.join(".ssl"),
        home.join(".certs"),
        home.join(".certificates"),
        home.join("certs"),
        home.join("certificates"),
        home.join(".gnupg"),
        // Config / app data (browser exports, admin tools).
        home.join(".config"),
        home.join(".local/share"),
        // Flatpak / snap home areas.
        home.join(".var/app"),
        home.join("snap"),
    ];
    if let Some(d) = dirs::document_dir() {
        roots.push(d);
    }
    if let Some(d) = dirs::desktop_dir() {
        roots.push(d);
    }
    if let Some(d) = dirs::download_dir() {
        roots.push(d);
    }

    if cfg!(target_os = "macos") {
        roots.push(home.join("Library/Keychains"));
        roots.push(home.join("Library/Application Support"));
    } else if cfg!(unix) {
        roots.push(PathBuf::from("/etc/ssl/private"));
        roots.push(PathBuf::from("/etc/pki/tls/private"));
        roots.push(PathBuf::from("/etc/pki/ca-trust/source"));
    }
    roots
}

/// Directories that will never contain user certificates.
fn should_skip_dir(name: &str, depth: usize) -> bool {
    const ALWAYS_SKIP: [&str; 20] = [
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "__pycache__",
        ".cache",
        "Cache",
        "cache",
        "CacheStorage",
        "Code Cache",
        "GPUCache",
        "logs",
        "Logs",
        "tmp",
        "temp",
        ".Trash",
        "Trash",
        "thumbnails",
        "locales",
        "fonts",
    ];
    if ALWAYS_SKIP.contains(&name) {
        return true;
    }
    // Deep hidden directories are skipped unless they smell cert-related.
    if depth > 1 && name.starts_with('.') {
        let lower = name.to_ascii_lowercase();
        let cert_related = ["cert", "pki", "ssl", "key", "crypto", "firefox", "mozilla", "thunderbird"]
            .iter()
            .any(|needle| lower.contains(needle));
        return !cert_related;
    }
    false
}

fn has_p12_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .as_deref(),
        Some("p12") | Some("pfx")
    )
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        assert!(has_p12_extension(Path::new("/a/b/cert.p12")));
        assert!(has_p12_extension(Path::new("/a/b/CERT.PFX")));
        assert!(!has_p12_extension(Path::new("/a/b/cert.pem")));
        assert!(!has_p12_extension(Path::new("/a/b/p12")));
    }

    #[test]
    fn test_skip_dirs() {
        assert!(should_skip_dir("node_modules", 1));
        assert!(should_skip_dir(".hidden-junk", 2));
        assert!(!should_skip_dir(".certs", 2));
        assert!(!should_skip_dir("Documents", 1));
        // Top-level hidden dirs still walked (e.g. ~/.config root itself).
        assert!(!should_skip_dir(".config", 1));
    }

    #[test]
    fn test_env_usize_parsing() {
        std::env::set_var("VOCSIGN_P12_TEST_ENV", "7");
        assert_eq!(env_usize("VOCSIGN_P12_TEST_ENV", 3), 7);
        std::env::set_var("VOCSIGN_P12_TEST_ENV", "0");
        assert_eq!(env_usize("VOCSIGN_P12_TEST_ENV", 3), 3);
        std::env::set_var("VOCSIGN_P12_TEST_ENV", "junk");
        assert_eq!(env_usize("VOCSIGN_P12_TEST_ENV", 3), 3);
        std::env::remove_var("VOCSIGN_P12_TEST_ENV");
        assert_eq!(env_usize("VOCSIGN_P12_TEST_ENV", 3), 3);
    }

    #[test]
    fn test_parse_metadata_classifies_protected_files() {
        use crate::services::test_support;
        let tmp = tempfile::TempDir::new().unwrap();

        let pkey = test_support::rsa_key();
        let cert = test_support::self_signed_cert(&pkey, "Loose Cert");
        let der = openssl::pkcs12::Pkcs12::builder()
            .name("loose")
            .pkey(&pkey)
            .cert(&cert)
            .build2("secret")
            .unwrap()
            .to_der()
            .unwrap();
        let path = tmp.path().join("export.p12");
        fs::write(&path, &der).unwrap();

        assert!(matches!(
            parse_metadata(&path, ""),
            Err(SignerError::PasswordRequired)
        ));
        let identity = parse_metadata(&path, "secret").unwrap();
        assert!(identity.identity.friendly_name.contains("export.p12"));
        assert!(matches!(
            identity.provenance,
            SystemProvenance::LooseP12 { .. }
        ));
    }
}
