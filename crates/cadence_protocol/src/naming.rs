//! Job naming conventions.
//!
//! Stage jobs are located purely by name: setup is `stage@<stage>`, teardown
//! is `stage@<stage>:teardown`. Pull-request copies of a job are prefixed with
//! `PR-<n>:`, and so are PR stage names.

use regex::Regex;
use std::sync::LazyLock;

static PR_JOB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(PR-\d+):(.+)$").expect("valid PR job name pattern"));
static STAGE_SETUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^stage@([\w-]+)$").expect("valid stage setup pattern"));
static STAGE_TEARDOWN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^stage@([\w-]+):teardown$").expect("valid stage teardown pattern")
});

/// Split `PR-3:build` into `(Some("PR-3"), "build")`; other names pass through.
pub fn split_pr_job_name(name: &str) -> (Option<&str>, &str) {
    match PR_JOB_NAME.captures(name) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(prefix), Some(rest)) => (Some(prefix.as_str()), rest.as_str()),
            _ => (None, name),
        },
        None => (None, name),
    }
}

pub fn pr_job_name(pr_num: u64, name: &str) -> String {
    format!("PR-{}:{}", pr_num, name)
}

/// Graph node name for a (possibly PR) job name.
pub fn node_name(job_name: &str) -> &str {
    split_pr_job_name(job_name).1
}

fn stage_job_name(stage_name: &str, suffix: Option<&str>) -> String {
    let (prefix, base) = split_pr_job_name(stage_name);
    let job = match suffix {
        Some(suffix) => format!("stage@{}:{}", base, suffix),
        None => format!("stage@{}", base),
    };
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, job),
        None => job,
    }
}

/// `stage@canary`, or `PR-1:stage@canary` for the PR stage `PR-1:canary`.
pub fn stage_setup_name(stage_name: &str) -> String {
    stage_job_name(stage_name, None)
}

/// `stage@canary:teardown`, or `PR-1:stage@canary:teardown`.
pub fn stage_teardown_name(stage_name: &str) -> String {
    stage_job_name(stage_name, Some("teardown"))
}

pub fn is_stage_setup(job_name: &str) -> bool {
    STAGE_SETUP.is_match(node_name(job_name))
}

pub fn is_stage_teardown(job_name: &str) -> bool {
    STAGE_TEARDOWN.is_match(node_name(job_name))
}

/// Stage a setup or teardown job belongs to, PR prefix preserved.
pub fn stage_name_of(job_name: &str) -> Option<String> {
    let (prefix, base) = split_pr_job_name(job_name);
    let caps = STAGE_SETUP
        .captures(base)
        .or_else(|| STAGE_TEARDOWN.captures(base))?;
    let stage = caps.get(1)?.as_str();
    Some(match prefix {
        Some(prefix) => format!("{}:{}", prefix, stage),
        None => stage.to_string(),
    })
}

/// Name of a stage as seen by a (possibly PR) job: `canary` or `PR-1:canary`.
pub fn scoped_stage_name(job_name: &str, stage_name: &str) -> String {
    match split_pr_job_name(job_name).0 {
        Some(prefix) => format!("{}:{}", prefix, stage_name),
        None => stage_name.to_string(),
    }
}

/// Whether a cause message carries the skip-further directive.
pub fn contains_skip_further(cause_message: &str, token: &str) -> bool {
    !token.is_empty() && cause_message.contains(token)
}
