//! Built-in pattern banks for the L1 detectors.
//!
//! Patterns are named after what they detect — the names surface verbatim in
//! [`DetectorVerdict`](crate::detectors::DetectorVerdict)s and guard results.
//! Broad numeric patterns (bare digit runs in the locale PII banks) are
//! kept at low severity: they are flag-only signals, never block-worthy
//! on their own.

use crate::pipeline::outcome::Severity;

use super::registry::{PatternCategory, PatternDefinition, PatternRegistry};

/// Helper to reduce boilerplate when defining static banks.
macro_rules! pat {
    ($id:expr, $name:expr, $re:expr, $sev:expr, $conf:expr) => {
        ($id, $name, $re, $sev, $conf)
    };
}

type Entry = (
    &'static str,
    &'static str,
    &'static str,
    Severity,
    f32,
);

fn prompt_injection_bank() -> Vec<Entry> {
    use Severity::{Critical, High, Medium};
    vec![
        pat!(
            "PI-001",
            "IgnoreInstructions",
            r"(?i)ignore\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)\s+(?:instructions?|prompts?|directives?|rules)",
            Critical,
            0.95
        ),
        pat!(
            "PI-002",
            "DisregardInstructions",
            r"(?i)disregard\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)",
            Critical,
            0.9
        ),
        pat!(
            "PI-003",
            "ForgetInstructions",
            r"(?i)forget\s+(?:everything|all\s+(?:previous|prior)\s+instructions?)",
            Critical,
            0.9
        ),
        pat!(
            "PI-004",
            "NewInstructions",
            r"(?i)new\s+instructions?\s*:",
            High,
            0.85
        ),
        pat!("PI-005", "RoleSwitch", r"(?i)\byou\s+are\s+now\b", High, 0.85),
        pat!(
            "PI-006",
            "SystemPromptLeak",
            r"(?i)(?:show|print|reveal|display|repeat|tell)\s+(?:me\s+)?(?:the\s+|your\s+)?(?:system\s+prompt|initial\s+instructions|hidden\s+instructions)",
            Critical,
            0.9
        ),
        pat!(
            "PI-007",
            "DeveloperMode",
            r"(?i)(?:enable|enter|activate)\s+(?:developer|debug|god)\s+mode",
            High,
            0.9
        ),
        pat!("PI-008", "ActAs", r"(?i)\bact\s+as\s+(?:a|an)\b", Medium, 0.6),
        pat!(
            "PI-009",
            "PretendYouAre",
            r"(?i)pretend\s+(?:to\s+be|you\s+are)\b",
            High,
            0.8
        ),
        pat!(
            "PI-010",
            "ContextDelimiter",
            r"(?i)###\s*(?:system|instruction|admin)",
            High,
            0.9
        ),
        pat!("PI-011", "InstTag", r"\[/?INST\]", High, 0.9),
        pat!(
            "PI-012",
            "ChatRoleToken",
            r"<\|(?:im_start|im_end|system|user|assistant|endoftext)\|>",
            Critical,
            0.95
        ),
        pat!(
            "PI-013",
            "SystemColonPrefix",
            r"(?im)^\s*system\s*:",
            High,
            0.85
        ),
        pat!(
            "PI-014",
            "OverrideProgramming",
            r"(?i)override\s+your\s+(?:programming|instructions|rules)",
            Critical,
            0.9
        ),
    ]
}

fn jailbreak_bank() -> Vec<Entry> {
    use Severity::{Critical, High, Medium};
    vec![
        pat!(
            "JB-001",
            "DANMode",
            r"(?i)\byou\s+are\s+(?:now\s+)?DAN\b|\bDAN\s+mode\b|\bdo\s+anything\s+now\b",
            Critical,
            0.95
        ),
        pat!(
            "JB-002",
            "STANMode",
            r"(?i)\byou\s+are\s+(?:now\s+)?STAN\b|\bSTAN\s+mode\b|\bstrive\s+to\s+avoid\s+norms\b",
            Critical,
            0.9
        ),
        pat!(
            "JB-003",
            "DUDEMode",
            r"(?i)\byou\s+are\s+(?:now\s+)?DUDE\b|\bDUDE\s+mode\b",
            Critical,
            0.9
        ),
        pat!(
            "JB-004",
            "AIMMode",
            r"(?i)\bAIM\s+mode\b|\balways\s+intelligent\s+and\s+machiavellian\b",
            Critical,
            0.9
        ),
        pat!(
            "JB-005",
            "UnrestrictedMode",
            r"(?i)(?:no|without|free\s+(?:of|from))\s+(?:restrictions?|limitations?|filters?|censorship)|\bunrestricted\s+(?:mode|AI|model)\b",
            High,
            0.85
        ),
        pat!(
            "JB-006",
            "HypotheticalScenario",
            r"(?i)\bhypothetically\b|in\s+a\s+hypothetical\s+(?:world|scenario)|imagine\s+(?:that\s+)?you\s+(?:are|were|had|could)",
            Medium,
            0.6
        ),
        pat!(
            "JB-007",
            "VillainRoleplay",
            r"(?i)(?:roleplay|role-play|play\s+the\s+role)\s+(?:of\s+|as\s+)?(?:a\s+|an\s+|the\s+)?(?:villain|evil|criminal)|fictional\s+(?:villain|criminal)",
            High,
            0.8
        ),
        pat!(
            "JB-008",
            "TokenThreat",
            r"(?i)(?:you\s+(?:will\s+)?lose|i\s+will\s+deduct)\s+\d+\s+tokens?",
            Medium,
            0.65
        ),
        pat!("JB-009", "OppositeDay", r"(?i)\bopposite\s+day\b", Medium, 0.7),
        pat!(
            "JB-010",
            "GrandmotherPretext",
            r"(?i)(?:my\s+)?(?:deceased\s+|late\s+)?grandmother\s+(?:used\s+to|would)\s+(?:tell|read|recite)",
            High,
            0.8
        ),
        pat!(
            "JB-011",
            "TranslationWrapper",
            r"(?i)translate\s+(?:the\s+following|this)[\s\S]{0,80}(?:ignore|bypass|jailbreak)",
            High,
            0.8
        ),
        pat!(
            "JB-012",
            "EvilConfidant",
            r"(?i)evil\s+(?:confidant|assistant|twin)",
            High,
            0.85
        ),
    ]
}

fn encoding_bank() -> Vec<Entry> {
    use Severity::Medium;
    vec![
        pat!(
            "EN-001",
            "Base64Blob",
            r"[A-Za-z0-9+/]{40,}={0,2}",
            Medium,
            0.7
        ),
        pat!("EN-002", "HexRun", r"\b(?:0x)?[0-9a-fA-F]{32,}\b", Medium, 0.6),
        pat!(
            "EN-003",
            "UnicodeEscapes",
            r"(?:\\u[0-9a-fA-F]{4}){3,}",
            Medium,
            0.7
        ),
        pat!(
            "EN-004",
            "HtmlEntityRun",
            r"(?:&#x?[0-9a-fA-F]{1,6};){3,}",
            Medium,
            0.7
        ),
        pat!(
            "EN-005",
            "UrlEncodedRun",
            r"(?:%[0-9a-fA-F]{2}){6,}",
            Medium,
            0.7
        ),
        pat!(
            "EN-006",
            "EncodingMention",
            r"(?i)\brot-?13\b|\bpig\s+latin\b|\breverse(?:d)?\s+(?:the\s+)?text\b|\bbackwards\s+text\b",
            Medium,
            0.75
        ),
    ]
}

fn pii_neutral_bank() -> Vec<Entry> {
    use Severity::{Critical, High, Low, Medium};
    vec![
        pat!(
            "PN-001",
            "Email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            Medium,
            0.9
        ),
        pat!(
            "PN-002",
            "IPv4Address",
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)\b",
            Low,
            0.8
        ),
        pat!(
            "PN-003",
            "CreditCard",
            r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[ -]?\d{4}[ -]?\d{4}[ -]?\d{2,4}\b",
            Critical,
            0.95
        ),
        pat!(
            "PN-004",
            "Iban",
            r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b",
            High,
            0.85
        ),
        pat!(
            "PN-005",
            "MacAddress",
            r"\b(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b",
            Low,
            0.8
        ),
        pat!(
            "PN-006",
            "PrivateKeyPem",
            r"-----BEGIN\s+(?:RSA\s+|EC\s+|DSA\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
            Critical,
            0.98
        ),
        pat!(
            "PN-007",
            "ApiKeyAssignment",
            r#"(?i)\b(?:api[_-]?key|secret[_-]?key|access[_-]?token|auth[_-]?token)\s*[:=]\s*['"]?[A-Za-z0-9_\-]{16,}"#,
            Critical,
            0.9
        ),
        pat!(
            "PN-008",
            "JwtToken",
            r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b",
            High,
            0.9
        ),
        pat!(
            "PN-009",
            "PasswordAssignment",
            r#"(?i)\bpassword\s*[:=]\s*['"]?\S{6,}"#,
            High,
            0.85
        ),
    ]
}

fn pii_us_bank() -> Vec<Entry> {
    use Severity::{Critical, High, Info, Low, Medium};
    vec![
        pat!("US-001", "UsSsn", r"\b\d{3}-\d{2}-\d{4}\b", Critical, 0.9),
        pat!("US-002", "UsEin", r"\b\d{2}-\d{7}\b", Medium, 0.6),
        pat!(
            "US-003",
            "UsItin",
            r"\b9\d{2}-(?:7\d|8[0-8])-\d{4}\b",
            High,
            0.85
        ),
        // Matches any bare 12-digit run. Flag-only.
        pat!("US-004", "UsDriverLicense", r"\b\d{12}\b", Low, 0.4),
        pat!("US-005", "UsPassport", r"\b[A-Z]\d{8}\b", Medium, 0.6),
        pat!("US-006", "UsZipCode", r"\b\d{5}(?:-\d{4})?\b", Info, 0.3),
    ]
}

fn pii_kr_bank() -> Vec<Entry> {
    use Severity::{Critical, Low, Medium};
    vec![
        pat!("KR-001", "KrRrn", r"\b\d{6}-[1-4]\d{6}\b", Critical, 0.95),
        pat!(
            "KR-002",
            "KrMobile",
            r"\b01[016789]-\d{3,4}-\d{4}\b",
            Medium,
            0.8
        ),
        pat!(
            "KR-003",
            "KrLandline",
            r"\b0(?:2|[3-6]\d)-\d{3,4}-\d{4}\b",
            Low,
            0.6
        ),
        pat!(
            "KR-004",
            "KrDriverLicense",
            r"\b\d{2}-\d{2}-\d{6}-\d{2}\b",
            Medium,
            0.7
        ),
        pat!("KR-005", "KrPassport", r"\b[MS]\d{8}\b", Medium, 0.6),
        // Matches any bare 7-digit run. Flag-only.
        pat!("KR-006", "KrBankAccount", r"\b\d{7}\b", Low, 0.3),
        pat!(
            "KR-007",
            "KrBusinessNumber",
            r"\b\d{3}-\d{2}-\d{5}\b",
            Medium,
            0.7
        ),
    ]
}

fn pii_jp_bank() -> Vec<Entry> {
    use Severity::{Low, Medium};
    vec![
        // Matches 12-digit runs without a checksum. Flag-only.
        pat!(
            "JP-001",
            "JpMyNumber",
            r"\b\d{4}-\d{4}-\d{4}\b|\b\d{12}\b",
            Medium,
            0.6
        ),
        pat!("JP-002", "JpMobile", r"\b0[789]0-\d{4}-\d{4}\b", Medium, 0.8),
        pat!(
            "JP-003",
            "JpLandline",
            r"\b0\d{1,4}-\d{1,4}-\d{4}\b",
            Low,
            0.5
        ),
        pat!("JP-004", "JpDriverLicense", r"\b\d{12}\b", Low, 0.4),
        pat!("JP-005", "JpPassport", r"\b[A-Z]{2}\d{7}\b", Medium, 0.6),
    ]
}

fn refusal_bank() -> Vec<Entry> {
    use Severity::Info;
    vec![
        pat!(
            "RF-001",
            "CannotAssist",
            r"(?i)\bI\s+(?:cannot|can't|won't|will\s+not)\s+(?:assist|help|comply|do\s+that|provide)",
            Info,
            0.8
        ),
        pat!(
            "RF-002",
            "AsAnAiModel",
            r"(?i)\bas\s+an\s+AI(?:\s+(?:language\s+)?model)?,?\s+I\s+(?:cannot|can't|am\s+not\s+able)",
            Info,
            0.8
        ),
        pat!(
            "RF-003",
            "AgainstPolicy",
            r"(?i)\b(?:against|violates?)\s+(?:my|our)\s+(?:guidelines|policies|policy|programming)",
            Info,
            0.7
        ),
        pat!(
            "RF-004",
            "UnableToProvide",
            r"(?i)\bI(?:'m|\s+am)\s+(?:unable|not\s+able)\s+to\s+(?:provide|assist|help)",
            Info,
            0.7
        ),
    ]
}

fn rag_injection_bank() -> Vec<Entry> {
    use Severity::{Critical, High, Medium};
    vec![
        pat!(
            "RG-001",
            "DocumentOverride",
            r"(?i)ignore\s+(?:all\s+)?(?:previous|prior|above)\s+(?:instructions?|context)",
            High,
            0.9
        ),
        pat!("RG-002", "EmbeddedSystemPrompt", r"(?m)^\s*SYSTEM\s*:", High, 0.85),
        pat!(
            "RG-003",
            "HtmlCommentInstruction",
            r"(?is)<!--[^>]{0,200}(?:instruction|system|prompt|ignore)[^>]{0,200}-->",
            High,
            0.85
        ),
        pat!(
            "RG-004",
            "AddressedToAi",
            r"(?i)\b(?:dear|attention|hey)\s+(?:AI|assistant|model|chatbot)\b|\bif\s+you\s+are\s+an?\s+(?:AI|LLM|language\s+model)\b",
            High,
            0.85
        ),
        pat!(
            "RG-005",
            "ExfiltrationInstruction",
            r"(?i)(?:send|post|exfiltrate|forward)\s+(?:the\s+)?(?:conversation|data|secrets?|credentials?)\s+to\b",
            Critical,
            0.9
        ),
        pat!(
            "RG-006",
            "EncodedBlob",
            r"[A-Za-z0-9+/]{60,}={0,2}|(?:&#x?[0-9a-fA-F]{1,6};){5,}",
            Medium,
            0.7
        ),
    ]
}

fn register_bank(registry: &PatternRegistry, category: PatternCategory, bank: Vec<Entry>) {
    for (id, name, re, severity, confidence) in bank {
        // Built-in regexes are compile-checked by tests; a failure here is a
        // programming error, so skip rather than poison the registry.
        match PatternDefinition::new(id, name, re, severity, confidence) {
            Ok(def) => registry.register(category, def),
            Err(e) => tracing::error!(pattern = id, error = %e, "builtin pattern failed to compile"),
        }
    }
}

/// Load the built-in banks into `registry`.
///
/// The neutral banks always load; locale PII banks load only for the
/// requested `languages` (unknown tags are ignored).
pub fn load_builtins(registry: &PatternRegistry, languages: &[String]) {
    register_bank(
        registry,
        PatternCategory::PromptInjection,
        prompt_injection_bank(),
    );
    register_bank(registry, PatternCategory::Jailbreak, jailbreak_bank());
    register_bank(registry, PatternCategory::Encoding, encoding_bank());
    register_bank(registry, PatternCategory::PiiNeutral, pii_neutral_bank());
    register_bank(registry, PatternCategory::Refusal, refusal_bank());
    register_bank(registry, PatternCategory::RagInjection, rag_injection_bank());

    for language in languages {
        match PatternCategory::pii_bank_for(language) {
            Some(PatternCategory::PiiUs) => {
                register_bank(registry, PatternCategory::PiiUs, pii_us_bank());
            }
            Some(PatternCategory::PiiKr) => {
                register_bank(registry, PatternCategory::PiiKr, pii_kr_bank());
            }
            Some(PatternCategory::PiiJp) => {
                register_bank(registry, PatternCategory::PiiJp, pii_jp_bank());
            }
            _ => tracing::debug!(language, "no PII bank for locale tag"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
