//! System-store scan workflow.
//!
//! Combines the OS-native keychain scan, the bounded-parallel NSS
//! subprocess fan-out, and the loose-PKCS#12 walk, then deduplicates
//! against identities already in the store. Individual store failures are
//! reported, never fatal; cancellation yields the partial result.

use crate::domain::identity::SystemIdentity;
use crate::infra::context::Context;
use crate::infra::error::SignerResult;
use crate::services::identity_store::IdentityStore;
use crate::services::{p12_scan, system_store};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// What a full system scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Discovered identities not yet in the store, deduplicated by
    /// fingerprint.
    pub identities: Vec<SystemIdentity>,
    /// Password-protected .p12 files the user could import manually.
    pub locked_p12: Vec<PathBuf>,
    /// Per-store failures, for display; the scan itself still succeeded.
    pub errors: Vec<String>,
}

pub struct ScanWorkflow<'a> {
    store: &'a IdentityStore,
    parallelism: usize,
    deadline: Duration,
}

impl<'a> ScanWorkflow<'a> {
    #[must_use]
    pub fn new(store: &'a IdentityStore, parallelism: usize, deadline: Duration) -> Self {
        Self {
            store,
            parallelism,
            deadline,
        }
    }

    pub fn run(&self, ctx: &Context) -> SignerResult<ScanOutcome> {
        let ctx = ctx.with_timeout(self.deadline);
        let started = std::time::Instant::now();
        let mut outcome = ScanOutcome::default();
        let mut all: Vec<SystemIdentity> = Vec::new();

        // 1. OS-native keychain.
        match system_store::scan_os_native() {
            Ok(mut identities) => {
                log::debug!("OS store returned {} identities", identities.len());
                all.append(&mut identities);
            }
            Err(e) => {
                log::debug!("OS store scan failed: {e}");
                outcome.errors.push(format!("OS store: {e}"));
            }
        }

        // 2. NSS profiles via subprocess workers.
        let nss = system_store::scan_nss_stores(&ctx, self.parallelism);
        all.extend(nss.identities);
        outcome.errors.extend(nss.errors);

        // 3. Loose .p12/.pfx files.
        let loose = p12_scan::scan(&ctx);
        all.extend(loose.identities);
        outcome.locked_p12 = loose.locked;

        // Deduplicate against stored identities, then within the result set.
        let mut seen: HashSet<String> = self
            .store
            .list()?
            .iter()
            .map(|identity| identity.fingerprint_hex())
            .collect();
        for system in all {
            if seen.insert(system.identity.fingerprint_hex()) {
                outcome.identities.push(system);
            }
        }

        log::debug!(
            "system scan finished in {:?}: {} new identities, {} locked p12, {} errors",
            started.elapsed(),
            outcome.identities.len(),
            outcome.locked_p12.len(),
            outcome.errors.len()
        );
        Ok(outcome)
    }
}
