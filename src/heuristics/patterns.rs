use std::sync::LazyLock;

use regex::Regex;

/// Legal-term lexicon for document classification. Matched as whole words,
/// case-insensitively. Words that the structural probes look for
/// (signature, signed, date) are deliberately absent.
pub const LEGAL_LEXICON: &[&str] = &[
    "agreement",
    "affidavit",
    "acknowledge",
    "acknowledgment",
    "aforementioned",
    "attest",
    "consideration",
    "contract",
    "covenant",
    "declarant",
    "deed",
    "executed",
    "grantee",
    "grantor",
    "hereby",
    "herein",
    "hereinafter",
    "indemnify",
    "jurisdiction",
    "notary",
    "notarized",
    "parties",
    "pursuant",
    "sworn",
    "therein",
    "whereas",
    "witness",
];

/// Terms never flagged by the spelling heuristics.
pub const SPELLING_ALLOWLIST: &[&str] = &[
    "hereby",
    "whereas",
    "aforementioned",
    "therein",
    "pursuant",
    "hereinafter",
    "notary",
    "jurisdiction",
    "affidavit",
    "acknowledgment",
];

pub const MIN_SPELLING_TOKEN_LEN: usize = 3;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static heuristic pattern is valid")
}

pub static SIGNATURE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?im)^\s*(?:(?:notary\s+(?:public\s+)?)?signature|signed(?:\s+by)?)\s*:\s*\S+|^\s*_{5,}\s*$")
});

pub static DATE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?im)^\s*(?:date|dated)\s*:\s*\S+"));

pub static PARTY_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?i)\b(?:hereinafter\s+(?:referred\s+to\s+as\s+)?["“(]|by\s+and\s+between\b|(?:first|second)\s+party\b)"#)
});

pub static NOTARY_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)notary\s+(?:public\s+)?signature:?\s*\w+"));

pub static NOTARY_SIGNATURE_NEGATED: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)(?:missing|absent|illegible)\s+(?:notary\s+)?signature"));

pub static NOTARY_SEAL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)notary\s+(?:public\s+)?seal:?\s*(?:present|affixed)"));

pub static NOTARY_SEAL_NEGATED: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)(?:missing|absent|illegible)\s+(?:notary\s+)?seal"));

pub static PROPER_DATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)(?:date|dated):\s*\d{2}/\d{2}/\d{4}"));

pub static WITNESS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i:witness(?:ed)?\s+by):?\s*[A-Z][a-zA-Z]+"));

/// Explicit critical phrases. Any match rejects the document under every policy.
pub static CRITICAL_PATTERNS: LazyLock<Vec<(CriticalKind, Regex)>> = LazyLock::new(|| {
    vec![
        (
            CriticalKind::MissingNotary,
            compile(r"(?i)notary.*(?:missing|absent|illegible)|(?:missing|absent|illegible)\s+notary\b"),
        ),
        (
            CriticalKind::MissingSignature,
            compile(r"(?i)signature.*(?:missing|absent|illegible)|(?:missing|absent|illegible)\s+(?:\w+\s+)?signature"),
        ),
        (
            CriticalKind::MissingSeal,
            compile(r"(?i)\bseal.*(?:missing|absent|illegible)|(?:missing|absent|illegible)\s+(?:\w+\s+)?seal\b"),
        ),
        (
            CriticalKind::DataErrors,
            compile(r"(?i)(?:error|discrepanc|incorrect).*(?:data|information|detail)"),
        ),
    ]
});

/// dd/mm with a two, three or five digit year.
pub static MALFORMED_DATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b\d{1,2}/\d{1,2}/(?:\d{2}|\d{3}|\d{5})\b"));

pub static INCONSISTENT_SPACING: LazyLock<Regex> = LazyLock::new(|| compile(r"\S {2,}\S|\t"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriticalKind {
    MissingNotary,
    MissingSignature,
    MissingSeal,
    DataErrors,
}

impl CriticalKind {
    pub fn describe(&self) -> &'static str {
        match self {
            CriticalKind::MissingNotary => "notary section reported missing, absent or illegible",
            CriticalKind::MissingSignature => "signature reported missing, absent or illegible",
            CriticalKind::MissingSeal => "seal reported missing, absent or illegible",
            CriticalKind::DataErrors => "document reports erroneous or inconsistent data",
        }
    }
}
