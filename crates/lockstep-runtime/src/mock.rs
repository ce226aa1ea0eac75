use crate::process::SolveControl;
use crate::solver::{SolveRequest, Solver};
use crate::RuntimeError;
use lockstep_schema::{normalize_name, EnvironmentDescriptor, Platform, EXPLICIT_MARKER};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Mutex;

const MOCK_HOST: &str = "https://conda.example";
const DEFAULT_CHANNEL: &str = "defaults";
const UNPINNED_VERSION: &str = "0.0.0";

/// Deterministic in-process solver for tests and dry runs.
///
/// Each descriptor dependency resolves to exactly one artifact: pinned versions
/// are kept, a `>=` lower bound is used as the version, anything else becomes
/// `0.0.0`. Build ids are derived from name, version and platform, so the same
/// input always yields the same lock.
pub struct MockSolver {
    failing: HashSet<Platform>,
    calls: Mutex<Vec<Platform>>,
}

impl Default for MockSolver {
    fn default() -> Self {
        Self {
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make solves for `platform` exit non-zero.
    #[must_use]
    pub fn failing_on(mut self, platform: &str) -> Self {
        self.failing.insert(Platform::new(platform));
        self
    }

    /// Platforms solved so far, in call order.
    pub fn calls(&self) -> Vec<Platform> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn render(descriptors: &[EnvironmentDescriptor], platform: &Platform) -> String {
        let channel = descriptors
            .iter()
            .find_map(|d| d.channels.first())
            .map_or(DEFAULT_CHANNEL, |c| c.as_str());

        let mut out = format!("# generated by the mock solver\n# platform: {platform}\n{EXPLICIT_MARKER}\n");
        let mut seen = HashSet::new();
        for line in descriptors.iter().flat_map(|d| &d.dependencies) {
            let (name, version) = split_requirement(line);
            if !seen.insert(name.clone()) {
                continue;
            }
            let digest = blake3::hash(format!("{name}:{version}:{platform}").as_bytes());
            let hex = digest.to_hex();
            let build = &hex[..8];
            let _ = writeln!(
                out,
                "{MOCK_HOST}/{channel}/{platform}/{name}-{version}-{build}_0.tar.bz2"
            );
        }
        out
    }
}

/// Split a rendered dependency line into its normalized name and a concrete version.
fn split_requirement(line: &str) -> (String, String) {
    let line = line.trim();
    let split_at = line
        .find(|c: char| c.is_whitespace() || "=<>!~".contains(c))
        .unwrap_or(line.len());
    let name = normalize_name(&line[..split_at]);
    let constraint: String = line[split_at..].chars().filter(|c| !c.is_whitespace()).collect();

    let version = constraint
        .strip_prefix("==")
        .or_else(|| constraint.strip_prefix(">="))
        .or_else(|| constraint.strip_prefix('='))
        .map(|rest| rest.split(|c: char| c == ',' || c == '|').next().unwrap_or(rest))
        .filter(|v| !v.is_empty() && !v.contains('*'))
        .unwrap_or(UNPINNED_VERSION);
    (name, version.to_owned())
}

impl Solver for MockSolver {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn solve(
        &self,
        request: &SolveRequest<'_>,
        control: &SolveControl<'_>,
    ) -> Result<(), RuntimeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.platform.clone());
        }
        if control.is_cancelled() {
            return Err(RuntimeError::Cancelled(request.platform.clone()));
        }
        if self.failing.contains(request.platform) {
            return Err(RuntimeError::SolverInvocationFailed {
                platform: request.platform.clone(),
                code: Some(1),
                stderr: format!("mock solver: no solution for {}", request.platform),
            });
        }

        let descriptors = request
            .descriptors
            .iter()
            .map(EnvironmentDescriptor::read_from)
            .collect::<Result<Vec<_>, _>>()?;
        let content = Self::render(&descriptors, request.platform);
        std::fs::create_dir_all(request.work_dir)?;
        std::fs::write(
            request.work_dir.join(request.platform.raw_lock_file_name()),
            content,
        )?;
        Ok(())
    }
}
