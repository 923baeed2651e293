//! In-memory collaborators for exercising the managers without external
//! tools or a database. Enabled for this crate's tests and, through the
//! `test-utils` feature, for dependent crates.

use crate::process::{CommandOutput, CommandSpec, Pipeline, ProcessRunner};
use crate::ssl::{CertificateStore, DomainCertificate};
use crate::utils::errors::{OrchestratorError, Result};
use crate::workload::{Workload, WorkloadInventory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type CommandHandler = dyn Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Records every invocation and succeeds unless told otherwise.
///
/// Pipelines with an output file get [`FakeRunner::with_payload`] bytes
/// written to it. A failing pipeline still leaves a truncated output file
/// behind, like a real shell pipeline would.
pub struct FakeRunner {
    commands: Mutex<Vec<CommandSpec>>,
    pipelines: Mutex<Vec<Pipeline>>,
    failing_programs: Mutex<HashSet<String>>,
    failing_args: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    payload: Vec<u8>,
    handler: Option<Box<CommandHandler>>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            pipelines: Mutex::new(Vec::new()),
            failing_programs: Mutex::new(HashSet::new()),
            failing_args: Mutex::new(HashSet::new()),
            missing: Mutex::new(HashSet::new()),
            payload: b"fake backup payload".to_vec(),
            handler: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Runner that behaves like an ACME client writing into
    /// `<ssl_root>/live/<domain>/`. Each issuance produces distinct PEM text.
    pub fn acme(ssl_root: &Path) -> Self {
        let root = ssl_root.to_path_buf();
        let generation = AtomicUsize::new(0);
        Self::new().with_handler(move |command| {
            let domain_after = |flag: &str| {
                command
                    .args
                    .iter()
                    .position(|a| a == flag)
                    .and_then(|i| command.args.get(i + 1))
                    .cloned()
            };
            match command.args.first().map(String::as_str) {
                Some("certonly") | Some("renew") => {
                    let domain = domain_after("-d")
                        .or_else(|| domain_after("--cert-name"))
                        .unwrap_or_default();
                    let n = generation.fetch_add(1, Ordering::SeqCst);
                    write_live_certificate(&root, &domain, n)?;
                }
                Some("revoke") => {
                    if let Some(domain) = domain_after("--cert-name") {
                        let _ = std::fs::remove_dir_all(root.join("live").join(domain));
                    }
                }
                _ => {}
            }
            Ok(CommandOutput {
                status_code: Some(0),
                ..Default::default()
            })
        })
    }

    /// Every command or pipeline stage running `program` exits 1.
    pub fn fail_program(&self, program: &str) {
        lock(&self.failing_programs).insert(program.to_string());
    }

    /// Every command with `arg` among its arguments exits 1.
    pub fn fail_when_arg(&self, arg: &str) {
        lock(&self.failing_args).insert(arg.to_string());
    }

    /// `is_available(program)` reports false.
    pub fn set_missing(&self, program: &str) {
        lock(&self.missing).insert(program.to_string());
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        lock(&self.commands).clone()
    }

    pub fn pipelines(&self) -> Vec<Pipeline> {
        lock(&self.pipelines).clone()
    }

    fn failure_for(&self, command: &CommandSpec) -> Option<OrchestratorError> {
        let by_program = lock(&self.failing_programs).contains(&command.program);
        let by_arg = {
            let args = lock(&self.failing_args);
            command.args.iter().any(|a| args.contains(a))
        };
        (by_program || by_arg)
            .then(|| OrchestratorError::process(&command.program, Some(1), "simulated failure"))
    }
}

fn write_live_certificate(root: &Path, domain: &str, generation: usize) -> Result<()> {
    let live = root.join("live").join(domain);
    std::fs::create_dir_all(&live)?;
    let pem = |label: &str, body: &str| {
        format!("-----BEGIN {label}-----\n{body} #{generation}\n-----END {label}-----\n")
    };
    std::fs::write(live.join("cert.pem"), pem("CERTIFICATE", domain))?;
    std::fs::write(live.join("privkey.pem"), pem("PRIVATE KEY", domain))?;
    std::fs::write(
        live.join("fullchain.pem"),
        format!("{}{}", pem("CERTIFICATE", domain), pem("CERTIFICATE", "intermediate")),
    )?;
    Ok(())
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        lock(&self.commands).push(command.clone());
        if let Some(err) = self.failure_for(command) {
            return Err(err);
        }
        match &self.handler {
            Some(handler) => handler(command),
            None => Ok(CommandOutput {
                status_code: Some(0),
                ..Default::default()
            }),
        }
    }

    async fn run_pipeline(&self, pipeline: &Pipeline) -> Result<CommandOutput> {
        lock(&self.pipelines).push(pipeline.clone());

        if let Some(input) = &pipeline.stdin_file {
            if !input.is_file() {
                return Err(OrchestratorError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", input.display()),
                )));
            }
        }

        let failure = pipeline.commands.iter().find_map(|c| self.failure_for(c));
        if let Some(output) = &pipeline.stdout_file {
            let written: &[u8] = if failure.is_some() {
                &self.payload[..self.payload.len() / 2]
            } else {
                &self.payload
            };
            std::fs::write(output, written)?;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(CommandOutput {
                status_code: Some(0),
                ..Default::default()
            }),
        }
    }

    async fn is_available(&self, program: &str) -> bool {
        !lock(&self.missing).contains(program)
    }
}

/// Certificate store backed by a map keyed by domain id.
#[derive(Default)]
pub struct MemoryCertificateStore {
    domains: Mutex<BTreeMap<String, DomainCertificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, domain: DomainCertificate) {
        lock(&self.domains).insert(domain.domain_id.clone(), domain);
    }

    pub fn get(&self, domain_id: &str) -> Option<DomainCertificate> {
        lock(&self.domains).get(domain_id).cloned()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn save_certificate(
        &self,
        domain_id: &str,
        encrypted_bundle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut domains = lock(&self.domains);
        let domain = domains
            .get_mut(domain_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("domain {domain_id}")))?;
        domain.ssl_enabled = true;
        domain.ssl_auto_renew = true;
        domain.ssl_certificate = Some(encrypted_bundle.to_string());
        domain.ssl_expires_at = Some(expires_at);
        domain.revoked = false;
        Ok(())
    }

    async fn load_bundle(&self, domain_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.domains)
            .get(domain_id)
            .and_then(|d| d.ssl_certificate.clone()))
    }

    async fn find_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<DomainCertificate>> {
        Ok(lock(&self.domains)
            .values()
            .filter(|d| d.is_due_for_renewal(before))
            .cloned()
            .collect())
    }

    async fn find_enabled(&self) -> Result<Vec<DomainCertificate>> {
        Ok(lock(&self.domains)
            .values()
            .filter(|d| d.ssl_enabled && d.ssl_certificate.is_some())
            .cloned()
            .collect())
    }

    async fn clear_certificate(&self, domain_id: &str) -> Result<()> {
        let mut domains = lock(&self.domains);
        let domain = domains
            .get_mut(domain_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("domain {domain_id}")))?;
        domain.ssl_enabled = false;
        domain.ssl_certificate = None;
        domain.ssl_expires_at = None;
        domain.revoked = true;
        Ok(())
    }
}

/// Fixed list of workloads.
#[derive(Debug, Default, Clone)]
pub struct StaticInventory {
    workloads: Vec<Workload>,
}

impl StaticInventory {
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self { workloads }
    }
}

#[async_trait]
impl WorkloadInventory for StaticInventory {
    async fn get(&self, workload_id: &str) -> Result<Option<Workload>> {
        Ok(self.workloads.iter().find(|w| w.id == workload_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workload>> {
        Ok(self.workloads.clone())
    }
}

/// Sets a file's modification time `days` days before `now`.
pub fn age_file(path: &Path, now: DateTime<Utc>, days: i64) -> std::io::Result<()> {
    let when: std::time::SystemTime = (now - chrono::Duration::days(days)).into();
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(when)
}
