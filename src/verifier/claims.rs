//! 声明抽取：把摘要与邮件切成可逐句替换的片段
//!
//! 只要含一个实义词的句子就是声明；例外只有问候语、结尾署名、中性替换句和缺口标记。
//! 问候语与结尾语必须是短小的称呼形态，带内容的长句（如 "Thanks to priority review, ..."）照常核验。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::strip_markers;
use crate::retrieval::tokenizer::{content_tokens, split_sentences};

/// 矛盾声明的替换句
pub const NEUTRAL_STATEMENT: &str = "This point could not be confirmed by the available sources.";
/// 无依据但必须保留位置时的缺口标记
pub const GAP_MARKER: &str = "Not found in sources.";

/// 无逗号的问候语最多的词数
const SALUTATION_MAX_WORDS: usize = 4;
/// 逗号前的问候前缀最多的词数，如 "Dear Regulatory Affairs Leadership Team,"
const GREETING_PREFIX_MAX_WORDS: usize = 6;
/// 署名行最多的词数
const SIGNATURE_MAX_WORDS: usize = 6;
/// 拆分出的子句至少要有的实义词数，不足则并回相邻子句
const MIN_CLAUSE_TOKENS: usize = 3;
/// 行动项去掉祈使动词后至少要剩下的实义词数
const MIN_ACTION_OBJECT_TOKENS: usize = 2;

static GREETING_RE: OnceLock<Regex> = OnceLock::new();
static CLOSING_RE: OnceLock<Regex> = OnceLock::new();
static CLAUSE_RE: OnceLock<Regex> = OnceLock::new();

fn greeting_re() -> &'static Regex {
    GREETING_RE.get_or_init(|| {
        Regex::new(r"(?i)^(dear|hi|hello|greetings|good (morning|afternoon|evening)|to whom)\b")
            .expect("valid greeting regex")
    })
}

fn closing_re() -> &'static Regex {
    CLOSING_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^((best|kind|warm|warmest)\s+regards|regards|(yours\s+)?(sincerely|truly|faithfully)|yours|many\s+thanks|thanks|thank\s+you|best\s+wishes|cheers|best)\s*[,.!]?$",
        )
        .expect("valid closing regex")
    })
}

fn clause_re() -> &'static Regex {
    CLAUSE_RE.get_or_init(|| {
        Regex::new(r"(?i)\s*;\s*|,?\s+(and|but|while|whereas|although|though|yet)\s+|,\s+")
            .expect("valid clause regex")
    })
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn is_marker(text: &str) -> bool {
    text == NEUTRAL_STATEMENT || text == GAP_MARKER
}

/// 一个句子片段
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub text: String,
    /// 是否需要核验
    pub claim: bool,
}

impl Segment {
    fn fixed(text: &str) -> Self {
        Self {
            text: text.to_string(),
            claim: false,
        }
    }
}

/// 一行文本的片段；空行为空 Vec
pub type Line = Vec<Segment>;

/// 句子是否构成声明
pub fn is_claim(sentence: &str) -> bool {
    let text = strip_markers(sentence.trim());
    !is_marker(text.trim()) && !content_tokens(&text).is_empty()
}

/// 把复合句拆成原子子句：分号、连词与分句逗号处断开；实义词太少的片段并回前一子句
pub fn split_clauses(sentence: &str) -> Vec<String> {
    let mut clauses: Vec<String> = Vec::new();
    let mut pending = String::new();
    for piece in clause_re().split(sentence) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !pending.is_empty() {
            pending.push(' ');
        }
        pending.push_str(piece);
        if content_tokens(&pending).len() >= MIN_CLAUSE_TOKENS {
            clauses.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        match clauses.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&pending);
            }
            None => clauses.push(pending),
        }
    }
    clauses
}

/// 行动项的可核验部分：去掉引用标记与开头的祈使动词（如 "Review:"、"Assess"）；
/// 剩余实义词过少时整句核验
pub fn action_claim(action: &str) -> String {
    let text = strip_markers(action);
    let trimmed = text.trim();
    if is_marker(trimmed) {
        return trimmed.to_string();
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or_default().trim_end_matches(':');
    let object = parts.next().unwrap_or_default().trim();
    let imperative = !verb.is_empty() && verb.chars().all(char::is_alphabetic);
    if imperative && content_tokens(object).len() >= MIN_ACTION_OBJECT_TOKENS {
        object.to_string()
    } else {
        trimmed.to_string()
    }
}

fn segments(line: &str, claims_allowed: bool) -> Line {
    split_sentences(line)
        .into_iter()
        .map(|text| Segment {
            claim: claims_allowed && is_claim(&text),
            text,
        })
        .collect()
}

/// 摘要：逐行逐句
pub fn summary_lines(summary: &str) -> Vec<Line> {
    summary.lines().map(|l| segments(l, true)).collect()
}

/// 问候行中称呼前缀的字节长度："Dear X, ..." 取到第一个逗号；无逗号的短称呼取整行
fn greeting_prefix(line: &str) -> Option<usize> {
    if !greeting_re().is_match(line) {
        return None;
    }
    match line.find(',') {
        Some(comma) => {
            (word_count(&line[..comma]) <= GREETING_PREFIX_MAX_WORDS).then_some(comma + 1)
        }
        None => (word_count(line) <= SALUTATION_MAX_WORDS).then_some(line.len()),
    }
}

/// 结尾语行：整行就是 "Best regards," / "Thank you!" 之类的称呼
fn is_closing(line: &str) -> bool {
    closing_re().is_match(line)
}

/// 署名行：短、不以句末符结尾
fn is_signature(line: &str) -> bool {
    word_count(line) <= SIGNATURE_MAX_WORDS && !line.ends_with(['.', '!', '?', '。', '！', '？'])
}

/// 结尾块起始行：结尾语之后只剩署名行的那一行
fn signoff_start(lines: &[&str]) -> Option<usize> {
    lines.iter().enumerate().find_map(|(i, line)| {
        let closing = is_closing(line.trim());
        let tail_ok = lines[i + 1..]
            .iter()
            .map(|l| l.trim())
            .all(|l| l.is_empty() || is_signature(l));
        (closing && tail_ok).then_some(i)
    })
}

/// 邮件：首个非空行的称呼不核验（其后的内容照常核验）；最后的结尾块不核验
pub fn email_lines(email: &str) -> Vec<Line> {
    let raw: Vec<&str> = email.lines().collect();
    let signoff = signoff_start(&raw).unwrap_or(raw.len());
    let mut out = Vec::with_capacity(raw.len());
    let mut seen_content = false;
    for (i, line) in raw.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push(Vec::new());
            continue;
        }
        let first = !seen_content;
        seen_content = true;
        if i >= signoff || is_closing(trimmed) {
            out.push(vec![Segment::fixed(trimmed)]);
            continue;
        }
        match greeting_prefix(trimmed).filter(|_| first) {
            Some(end) => {
                let mut line = vec![Segment::fixed(&trimmed[..end])];
                line.extend(segments(trimmed[end..].trim(), true));
                out.push(line);
            }
            None => out.push(segments(trimmed, true)),
        }
    }
    out
}

/// 重建文本：每行片段以空格相连；原本非空而被删空的行去掉，连续空行合并
pub fn render(lines: &[Line]) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        let text = line
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            let was_blank = line.is_empty();
            if was_blank && out.last().is_some_and(|l| !l.is_empty()) {
                out.push(String::new());
            }
            continue;
        }
        out.push(text);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMAIL: &str = "Dear Stakeholders,\n\nThe FDA approved 55 novel drugs in 2023. Details follow.\n\nBest regards,\nEnterprise Copilot Team";

    fn claims(lines: &[Line]) -> Vec<&str> {
        lines
            .iter()
            .flatten()
            .filter(|s| s.claim)
            .map(|s| s.text.as_str())
            .collect()
    }

    #[test]
    fn test_email_greeting_and_signoff_are_not_claims() {
        let lines = email_lines(EMAIL);
        assert_eq!(
            claims(&lines),
            vec!["The FDA approved 55 novel drugs in 2023.", "Details follow."]
        );
    }

    #[test]
    fn test_thanks_sentence_is_still_a_claim() {
        let email = "Dear Stakeholders,\n\nThanks to priority review, the FDA approved 300 novel drugs and cut review time to one week. Revenue tripled after the merger closed last quarter.\n\nBest regards,\nEnterprise Copilot Team";
        let lines = email_lines(email);
        assert_eq!(
            claims(&lines),
            vec![
                "Thanks to priority review, the FDA approved 300 novel drugs and cut review time to one week.",
                "Revenue tripled after the merger closed last quarter."
            ]
        );
    }

    #[test]
    fn test_content_after_greeting_prefix_is_a_claim() {
        let email = "Dear Stakeholders, revenue from gene therapies tripled after the merger.\n\nBest regards,\nOps";
        let lines = email_lines(email);
        assert_eq!(lines[0][0], Segment::fixed("Dear Stakeholders,"));
        assert_eq!(
            claims(&lines),
            vec!["revenue from gene therapies tripled after the merger."]
        );
        assert_eq!(render(&lines), email);
    }

    #[test]
    fn test_signoff_only_covers_closing_block() {
        // 结尾语后面还有正文，就不是结尾块
        let email = "Hello team,\n\nThanks,\nRevenue tripled after the merger closed last quarter.\n\nKind regards,\nOps";
        let lines = email_lines(email);
        assert_eq!(
            claims(&lines),
            vec!["Revenue tripled after the merger closed last quarter."]
        );
        assert!(lines[2].iter().all(|s| !s.claim));
    }

    #[test]
    fn test_render_round_trips_untouched_text() {
        assert_eq!(render(&email_lines(EMAIL)), EMAIL);
        let summary = "First finding is material [a.txt | Chunk #1]. Second finding follows.";
        assert_eq!(render(&summary_lines(summary)), summary);
    }

    #[test]
    fn test_render_drops_emptied_lines() {
        let mut lines = email_lines(EMAIL);
        for segment in lines[2].iter_mut() {
            segment.text.clear();
        }
        assert_eq!(
            render(&lines),
            "Dear Stakeholders,\n\nBest regards,\nEnterprise Copilot Team"
        );
    }

    #[test]
    fn test_short_sentences_are_claims() {
        assert!(!is_claim(GAP_MARKER));
        assert!(!is_claim(NEUTRAL_STATEMENT));
        assert!(!is_claim("[a.txt | Chunk #1]."));
        assert!(is_claim("Revenue tripled."));
        assert!(is_claim("Profits collapsed [a.txt | Chunk #1]."));
        assert!(is_claim("Median review time fell to eight months."));
    }

    #[test]
    fn test_split_clauses() {
        assert_eq!(
            split_clauses("The FDA approved 55 novel drugs in 2023 and banned biosimilar imports"),
            vec!["The FDA approved 55 novel drugs in 2023", "banned biosimilar imports"]
        );
        // 过短的片段并回前一子句
        assert_eq!(
            split_clauses("Adaptive designs reduced enrollment time and doubled costs"),
            vec!["Adaptive designs reduced enrollment time doubled costs"]
        );
        assert_eq!(
            split_clauses("In 2023, the FDA approved 55 novel drugs"),
            vec!["In 2023 the FDA approved 55 novel drugs"]
        );
    }

    #[test]
    fn test_action_claim_drops_imperative() {
        assert_eq!(
            action_claim("Review: Adaptive designs reduced enrollment time [a.txt | Chunk #1]"),
            "Adaptive designs reduced enrollment time"
        );
        assert_eq!(action_claim("Acquire Moderna."), "Acquire Moderna.");
        assert_eq!(action_claim(GAP_MARKER), GAP_MARKER);
    }
}
