//! Rule-based document verification.
//!
//! Everything here is a pure function of the input text and the two policy
//! choices held by [`HeuristicEngine`]; no I/O, no shared state. Identical
//! text under identical policies always yields an identical [`Verdict`].

pub mod patterns;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use patterns::{CriticalKind, LEGAL_LEXICON, MIN_SPELLING_TOKEN_LEN, SPELLING_ALLOWLIST};

/// Minimum number of distinct lexicon terms for a legal classification.
pub const MIN_LEXICON_HITS: usize = 3;

/// How the four notary probes combine into one validity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotaryPolicy {
    AllRequired,
    AnySufficient,
}

/// How heuristic findings turn into an accept/reject decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// Reject on a critical phrase, a failed legal classification or a
    /// failed notary checklist.
    Strict,
    /// Reject only on a critical phrase; everything else becomes a warning.
    Lenient,
}

impl FromStr for NotaryPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all_required" | "all-required" | "all" => Ok(Self::AllRequired),
            "any_sufficient" | "any-sufficient" | "any" => Ok(Self::AnySufficient),
            other => anyhow::bail!("unknown notary policy '{}'", other),
        }
    }
}

impl FromStr for VerdictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => anyhow::bail!("unknown verdict policy '{}'", other),
        }
    }
}

impl fmt::Display for NotaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllRequired => "all_required",
            Self::AnySufficient => "any_sufficient",
        })
    }
}

impl fmt::Display for VerdictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Lenient => "lenient",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalClassification {
    pub is_legal_document: bool,
    pub lexicon_hits: usize,
    pub matched_terms: Vec<String>,
    pub signature_block: bool,
    pub date_block: bool,
    pub party_definition: bool,
}

impl LegalClassification {
    pub fn has_structural_signal(&self) -> bool {
        self.signature_block || self.date_block || self.party_definition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryChecklist {
    pub has_notary_signature: bool,
    pub has_notary_seal: bool,
    pub has_proper_date: bool,
    pub has_witnesses: bool,
    pub policy: NotaryPolicy,
    pub is_valid: bool,
}

impl NotaryChecklist {
    fn probes(&self) -> [bool; 4] {
        [
            self.has_notary_signature,
            self.has_notary_seal,
            self.has_proper_date,
            self.has_witnesses,
        ]
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let names = ["notary signature", "notary seal", "dated line", "witness"];
        names
            .iter()
            .zip(self.probes())
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormatIssueKind {
    MalformedDate,
    InconsistentSpacing,
    RepeatedWord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatIssue {
    pub kind: FormatIssueKind,
    /// 1-based line number.
    pub line: usize,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: VerdictStatus,
    pub policy: VerdictPolicy,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub legal_classification: LegalClassification,
    pub notary_checklist: NotaryChecklist,
    pub critical_errors: Vec<CriticalKind>,
    pub format_issues: Vec<FormatIssue>,
    pub spelling_suspects: Vec<String>,
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        self.status == VerdictStatus::Verified
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeuristicEngine {
    pub notary_policy: NotaryPolicy,
    pub verdict_policy: VerdictPolicy,
}

impl HeuristicEngine {
    pub fn new(notary_policy: NotaryPolicy, verdict_policy: VerdictPolicy) -> Self {
        Self {
            notary_policy,
            verdict_policy,
        }
    }

    pub fn verify(&self, text: &str) -> Verdict {
        let legal = classify_legal(text);
        let notary = check_notary_elements(text, self.notary_policy);
        let critical = detect_critical_errors(text);
        let format_issues = detect_format_issues(text);
        let spelling = detect_spelling_suspects(text);

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        for kind in &critical {
            reasons.push(format!("critical: {}", kind.describe()));
        }

        let mut classification_findings = Vec::new();
        if !legal.is_legal_document {
            classification_findings.push(format!(
                "not classified as a legal document ({} lexicon terms, structural signal: {})",
                legal.lexicon_hits,
                legal.has_structural_signal()
            ));
        }
        if !notary.is_valid {
            classification_findings.push(format!(
                "notary checklist failed under {} (missing: {})",
                notary.policy,
                notary.missing().join(", ")
            ));
        }
        match self.verdict_policy {
            VerdictPolicy::Strict => reasons.extend(classification_findings),
            VerdictPolicy::Lenient => warnings.extend(classification_findings),
        }

        for issue in &format_issues {
            warnings.push(format!("line {}: {:?} near '{}'", issue.line, issue.kind, issue.excerpt));
        }
        if !spelling.is_empty() {
            warnings.push(format!("possible misspellings: {}", spelling.join(", ")));
        }

        let status = if reasons.is_empty() {
            VerdictStatus::Verified
        } else {
            VerdictStatus::Rejected
        };

        Verdict {
            status,
            policy: self.verdict_policy,
            reasons,
            warnings,
            legal_classification: legal,
            notary_checklist: notary,
            critical_errors: critical,
            format_issues,
            spelling_suspects: spelling,
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

pub fn classify_legal(text: &str) -> LegalClassification {
    let present: HashSet<String> = words(text).collect();
    let matched_terms: Vec<String> = LEGAL_LEXICON
        .iter()
        .filter(|term| present.contains(**term))
        .map(|term| term.to_string())
        .collect();

    let signature_block = patterns::SIGNATURE_BLOCK.is_match(text);
    let date_block = patterns::DATE_BLOCK.is_match(text);
    let party_definition = patterns::PARTY_DEFINITION.is_match(text);

    let lexicon_hits = matched_terms.len();
    LegalClassification {
        is_legal_document: lexicon_hits >= MIN_LEXICON_HITS
            && (signature_block || date_block || party_definition),
        lexicon_hits,
        matched_terms,
        signature_block,
        date_block,
        party_definition,
    }
}

pub fn check_notary_elements(text: &str, policy: NotaryPolicy) -> NotaryChecklist {
    let has_notary_signature = patterns::NOTARY_SIGNATURE.is_match(text)
        && !patterns::NOTARY_SIGNATURE_NEGATED.is_match(text);
    let has_notary_seal =
        patterns::NOTARY_SEAL.is_match(text) && !patterns::NOTARY_SEAL_NEGATED.is_match(text);
    let has_proper_date = patterns::PROPER_DATE.is_match(text);
    let has_witnesses = patterns::WITNESS.is_match(text);

    let mut checklist = NotaryChecklist {
        has_notary_signature,
        has_notary_seal,
        has_proper_date,
        has_witnesses,
        policy,
        is_valid: false,
    };
    let probes = checklist.probes();
    checklist.is_valid = match policy {
        NotaryPolicy::AllRequired => probes.iter().all(|p| *p),
        NotaryPolicy::AnySufficient => probes.iter().any(|p| *p),
    };
    checklist
}

pub fn detect_critical_errors(text: &str) -> Vec<CriticalKind> {
    patterns::CRITICAL_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
        .collect()
}

pub fn detect_format_issues(text: &str) -> Vec<FormatIssue> {
    let mut issues = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(m) = patterns::MALFORMED_DATE.find(line) {
            issues.push(FormatIssue {
                kind: FormatIssueKind::MalformedDate,
                line: line_no,
                excerpt: m.as_str().to_string(),
            });
        }
        if let Some(m) = patterns::INCONSISTENT_SPACING.find(line) {
            issues.push(FormatIssue {
                kind: FormatIssueKind::InconsistentSpacing,
                line: line_no,
                excerpt: m.as_str().replace('\t', "\\t"),
            });
        }
        let tokens: Vec<String> = words(line).collect();
        if let Some(pair) = tokens
            .windows(2)
            .find(|w| w[0] == w[1] && w[0].len() >= 2 && w[0].chars().all(char::is_alphabetic))
        {
            issues.push(FormatIssue {
                kind: FormatIssueKind::RepeatedWord,
                line: line_no,
                excerpt: format!("{} {}", pair[0], pair[1]),
            });
        }
    }
    issues
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

fn longest_run(word: &str, pred: impl Fn(char) -> bool) -> usize {
    let mut best = 0;
    let mut run = 0;
    for c in word.chars() {
        if pred(c) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

fn has_triple_letter(word: &str) -> bool {
    let lower: Vec<char> = word.chars().map(|c| c.to_ascii_lowercase()).collect();
    lower.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

/// Lowercase letter immediately followed by an uppercase one inside a
/// single word ("agreEment").
fn has_inner_capital(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    chars
        .windows(3)
        .any(|w| w[0].is_ascii_lowercase() && w[1].is_ascii_uppercase() && w[2].is_ascii_lowercase())
}

/// Longest vowel run seen in real words: "queue", "onomatopoeia".
const MAX_VOWEL_RUN: usize = 4;
/// Longest consonant run seen in real words: "strengths", "catchphrase".
const MAX_CONSONANT_RUN: usize = 6;

fn is_suspicious(word: &str) -> bool {
    longest_run(word, is_vowel) > MAX_VOWEL_RUN
        || longest_run(word, |c| c.is_ascii_alphabetic() && !is_vowel(c) && !matches!(c.to_ascii_lowercase(), 'y'))
            > MAX_CONSONANT_RUN
        || has_triple_letter(word)
        || has_inner_capital(word)
}

pub fn detect_spelling_suspects(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut suspects = Vec::new();
    for raw in text.split_whitespace() {
        let clean: String = raw.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        if clean.len() < MIN_SPELLING_TOKEN_LEN {
            continue;
        }
        let lower = clean.to_lowercase();
        if SPELLING_ALLOWLIST.contains(&lower.as_str()) {
            continue;
        }
        if is_suspicious(&clean) && seen.insert(lower) {
            suspects.push(clean);
        }
    }
    suspects
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTARIZED_DEED: &str = "\
QUITCLAIM DEED

This agreement is made by and between John Carter, hereinafter \"Grantor\",
and Mary Lane. The grantor hereby conveys the parcel for good consideration.

Signature: John Carter
Date: 04/11/2024
Witnessed by: Alice Moore
Notary Public Signature: Robert Hale
Notary Seal: affixed
";

    fn strict_all() -> HeuristicEngine {
        HeuristicEngine::new(NotaryPolicy::AllRequired, VerdictPolicy::Strict)
    }

    #[test]
    fn well_formed_deed_is_verified() {
        let verdict = strict_all().verify(NOTARIZED_DEED);
        assert_eq!(verdict.status, VerdictStatus::Verified, "{:?}", verdict.reasons);
        assert!(verdict.legal_classification.is_legal_document);
        assert!(verdict.notary_checklist.is_valid);
        assert!(verdict.critical_errors.is_empty());
    }

    #[test]
    fn verdicts_are_pure() {
        let engine = strict_all();
        assert_eq!(engine.verify(NOTARIZED_DEED), engine.verify(NOTARIZED_DEED));
    }

    #[test]
    fn three_lexicon_terms_with_signature_block_is_legal() {
        let text = "The parties hereby enter this agreement.\nSignature: Jane Roe\n";
        let legal = classify_legal(text);
        assert_eq!(legal.lexicon_hits, 3, "{:?}", legal.matched_terms);
        assert!(legal.signature_block);
        assert!(legal.is_legal_document);
    }

    #[test]
    fn two_lexicon_terms_is_not_legal() {
        let text = "The parties enter this agreement.\nSignature: Jane Roe\n";
        let legal = classify_legal(text);
        assert_eq!(legal.lexicon_hits, 2);
        assert!(!legal.is_legal_document);
    }

    #[test]
    fn lexicon_without_structure_is_not_legal() {
        let legal = classify_legal("whereas the parties hereby covenant and agreement");
        assert!(legal.lexicon_hits >= 3);
        assert!(!legal.has_structural_signal());
        assert!(!legal.is_legal_document);
    }

    #[test]
    fn lexicon_matching_is_case_insensitive() {
        let legal = classify_legal("WHEREAS the Parties HEREBY agree\nDated: tomorrow");
        assert_eq!(legal.lexicon_hits, 3);
        assert!(legal.date_block);
    }

    #[test]
    fn missing_signature_rejects_regardless_of_lexicon() {
        let text = format!("{}\nNote: the signature of the second party is missing.", NOTARIZED_DEED);
        for policy in [VerdictPolicy::Strict, VerdictPolicy::Lenient] {
            let verdict = HeuristicEngine::new(NotaryPolicy::AnySufficient, policy).verify(&text);
            assert_eq!(verdict.status, VerdictStatus::Rejected);
            assert!(verdict.critical_errors.contains(&CriticalKind::MissingSignature));
        }
        let bare = HeuristicEngine::new(NotaryPolicy::AnySufficient, VerdictPolicy::Lenient)
            .verify("signature missing");
        assert_eq!(bare.status, VerdictStatus::Rejected);
    }

    #[test]
    fn notary_policies_differ() {
        let text = "Notary Public Signature: Robert Hale\nNotary Seal: affixed\n";
        let all = check_notary_elements(text, NotaryPolicy::AllRequired);
        let any = check_notary_elements(text, NotaryPolicy::AnySufficient);
        assert!(all.has_notary_signature && all.has_notary_seal);
        assert!(!all.has_proper_date && !all.has_witnesses);
        assert!(!all.is_valid);
        assert!(any.is_valid);
        assert_eq!(all.missing(), vec!["dated line", "witness"]);
    }

    #[test]
    fn negated_seal_fails_probe() {
        let text = "Notary Seal: affixed\nmissing notary seal on page two";
        let checklist = check_notary_elements(text, NotaryPolicy::AnySufficient);
        assert!(!checklist.has_notary_seal);
    }

    #[test]
    fn lenient_policy_downgrades_classification_to_warning() {
        let text = "Meeting notes from Tuesday.\nWe talked about the budget.";
        let strict = strict_all().verify(text);
        let lenient = HeuristicEngine::new(NotaryPolicy::AllRequired, VerdictPolicy::Lenient).verify(text);
        assert_eq!(strict.status, VerdictStatus::Rejected);
        assert_eq!(lenient.status, VerdictStatus::Verified);
        assert!(lenient.has_warnings());
    }

    #[test]
    fn format_issues_carry_line_numbers() {
        let text = "first line\nsigned on 4/11/24 by  both\nthe the end";
        let issues = detect_format_issues(text);
        let kinds: Vec<_> = issues.iter().map(|i| (i.kind, i.line)).collect();
        assert!(kinds.contains(&(FormatIssueKind::MalformedDate, 2)));
        assert!(kinds.contains(&(FormatIssueKind::InconsistentSpacing, 2)));
        assert!(kinds.contains(&(FormatIssueKind::RepeatedWord, 3)));
    }

    #[test]
    fn spelling_warnings_never_reject() {
        let text = format!("{}\nThe grantoor agreeement was signned.", NOTARIZED_DEED);
        let verdict = strict_all().verify(&text);
        assert_eq!(verdict.status, VerdictStatus::Verified);
        assert!(verdict.spelling_suspects.iter().any(|s| s == "agreeement"));
        assert!(verdict.has_warnings());
    }

    #[test]
    fn spelling_skips_allowlist_and_short_tokens() {
        let suspects = detect_spelling_suspects("aforementioned aaa zz hereinafter");
        assert_eq!(suspects, vec!["aaa".to_string()]);
        assert_eq!(detect_spelling_suspects("the agreEment"), vec!["agreEment".to_string()]);
    }

    #[test]
    fn ordinary_english_is_not_a_spelling_suspect() {
        let text = "The beautiful queue of strengths and lengths in the catchphrase, \
                    per the onomatopoeia sequoia bylaws and rhythms.";
        assert!(detect_spelling_suspects(text).is_empty(), "{:?}", detect_spelling_suspects(text));

        let gibberish = detect_spelling_suspects("signed xkcdqwrtz aeiouo agreeement");
        assert_eq!(gibberish, vec!["xkcdqwrtz", "aeiouo", "agreeement"]);
    }

    #[test]
    fn policies_parse_from_config_strings() {
        assert_eq!("all_required".parse::<NotaryPolicy>().unwrap(), NotaryPolicy::AllRequired);
        assert_eq!("ANY-SUFFICIENT".parse::<NotaryPolicy>().unwrap(), NotaryPolicy::AnySufficient);
        assert_eq!("lenient".parse::<VerdictPolicy>().unwrap(), VerdictPolicy::Lenient);
        assert!("maybe".parse::<VerdictPolicy>().is_err());
    }
}
