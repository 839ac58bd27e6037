pub mod backends;
pub mod breaker;
pub mod config;
pub mod deps;
pub mod executor;
pub mod logging;
pub mod paths;
pub mod permissions;
pub mod process;
pub mod retry;
pub mod sanitize;
pub mod store;
pub mod vcs;
pub mod workflow;

pub const REVIEW_FOCUS_ALL_PROMPT: &str = r#"
You are reviewing the files below as a senior engineer. Cover correctness,
security, performance, and architecture in that order of priority. For each
finding give the file, the location, a one-line summary, and a short
explanation of the failure you expect. Close with an overall assessment.
Report only findings you can anchor to the code you were given; do not
speculate about files you cannot see.
"#;

pub const REVIEW_FOCUS_SECURITY_PROMPT: &str = r#"
You are performing a security review of the files below. Hunt for injection
points, unsanitized inputs reaching dangerous sinks, secrets in source,
path traversal, and missing permission checks. For each finding name the
file, the entry point, and a concrete attack that exercises it. If a file
is clean, say so in one line.
"#;

pub const REVIEW_FOCUS_PERFORMANCE_PROMPT: &str = r#"
You are performing a performance review of the files below. Look for
accidental quadratic work, repeated I/O in loops, unbounded growth of
collections, and blocking calls on hot paths. Quantify the cost you expect
for each finding and propose the cheapest fix that removes it.
"#;

pub const REVIEW_FOCUS_ARCHITECTURE_PROMPT: &str = r#"
You are reviewing the architecture of the files below. Evaluate module
boundaries, ownership of state, error propagation, and the seams where the
code would have to change for its most likely next requirement. Name the
couplings that will hurt first.
"#;

pub const REVIEW_SYNTHESIS_PROMPT: &str = r#"
You are merging several independent code reviews of the same files into a
single markdown review. Deduplicate overlapping findings, keep the sharpest
phrasing of each, order by severity, and end with a short verdict section.
Attribute nothing; the merged review speaks with one voice. When one of the
inputs is a failure stub rather than a review, note the gap in coverage in
a single sentence and move on.
"#;

pub const COMMIT_QUALITY_PROMPT: &str = r#"
Assess the commit below for code quality. Judge the diff on clarity,
test coverage of the changed behavior, error handling, and naming. List
warnings (style, minor gaps) separately from errors (bugs, broken
contracts, missing migrations). Be terse; one line per item.
"#;

pub const COMMIT_QUICK_SCAN_PROMPT: &str = r#"
Quick scan of the commit below: flag anything that would block a merge —
leftover debug output, commented-out code, accidental file inclusions,
secrets, or an obviously broken change. One line per flag; if nothing
blocks, reply PASS.
"#;

pub const SECRETS_SCAN_PROMPT: &str = r#"
Scan the staged diff below for secrets: API keys, tokens, private keys,
passwords, connection strings, or anything resembling a credential. Report
each with the line it appears on. If the diff is clean, reply PASS.
"#;

pub const BREAKING_CHANGE_PROMPT: &str = r#"
Scan the staged diff below for breaking changes: removed or renamed public
functions, changed signatures, altered serialization formats, and schema
migrations without a rollback path. Report each with the symbol affected.
If the diff is clean, reply PASS.
"#;

pub const EXTENDED_AUDIT_PROMPT: &str = r#"
Perform an extended pre-commit audit of the staged diff below: license
headers on new files, TODOs without an owner, dependency additions, and
changes to build or release configuration. Report findings one per line;
reply PASS when there are none.
"#;

pub const BUG_DISCOVERY_PROMPT: &str = r#"
Given the symptom described below and the repository file listing, name the
files most likely to contain the fault, one path per line, most suspicious
first. List at most eight. Output only paths.
"#;

pub const BUG_ANALYSIS_PROMPT: &str = r#"
Analyze the file below for the root cause of the symptom described. Trace
the data flow that could produce the symptom, name the exact expression or
branch you suspect, and rate your confidence low/medium/high. If the file
cannot produce the symptom, say CLEAR and why in one line.
"#;

pub const BUG_SYNTHESIS_PROMPT: &str = r#"
Merge the per-file analyses below into a root-cause report: the most likely
cause first with its evidence, then alternative hypotheses in decreasing
order, then the concrete next step to confirm the diagnosis. Keep it under
a page.
"#;

pub const ARCHITECT_ROLE_PROMPT: &str = r#"
You are the architect for the feature described below. Produce a design:
the components touched, new types and their owners, the data flow, and the
error paths. Do not write implementation code; write the contracts the
implementer will fill in.
"#;

pub const IMPLEMENTER_ROLE_PROMPT: &str = r#"
You are the implementer. Given the feature description and the architect's
design below, write the implementation plan as ordered concrete edits:
file, change, and the code-level approach for each. Flag any point where
the design is ambiguous rather than guessing.
"#;

pub const TESTER_ROLE_PROMPT: &str = r#"
You are the tester. Given the feature description, the design, and the
implementation plan below, write the test plan: the behaviors to pin, the
edge cases the plan is most likely to get wrong, and the regression risks
to existing behavior. Name each test and what it asserts.
"#;

pub const SESSION_CONTEXT_PROMPT: &str = r#"
Summarize the repository state below for an engineer starting a session:
what branch they are on, what is staged or modified, and what the recent
commits say about the current line of work. Three short paragraphs at
most; end with the single most useful next command to run.
"#;
