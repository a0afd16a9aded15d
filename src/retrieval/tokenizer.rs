//! 分词与句子切分
//!
//! 提供中英文混合分词能力，用于证据检索打分与核验时的声明比对。
//! 使用 jieba-rs 进行中文分词，英文按非词字符切分；数字（含小数、千分位、百分号）保持为一个词。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 停用词：不参与覆盖率计算（否定词也在其中，极性单独判断）
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "than", "so", "of", "to", "in", "on",
    "at", "by", "for", "with", "from", "into", "onto", "over", "under", "about", "as", "per",
    "via", "is", "are", "was", "were", "be", "been", "being", "am", "do", "does", "did", "has",
    "have", "had", "having", "will", "would", "shall", "should", "can", "could", "may", "might",
    "must", "it", "its", "this", "that", "these", "those", "there", "their", "they", "them",
    "we", "our", "us", "you", "your", "he", "she", "his", "her", "i", "me", "my", "which",
    "who", "whom", "what", "when", "where", "why", "how", "also", "all", "any", "each",
    "such", "both", "more", "most", "other", "some", "very", "just", "only", "own", "same",
    "not", "no", "never", "without", "cannot", "neither", "nor", "isn't", "aren't", "wasn't",
    "weren't", "don't", "doesn't", "didn't", "won't", "can't", "couldn't", "shouldn't",
    "hasn't", "haven't", "hadn't", "的", "了", "和", "是", "在", "与", "及", "或", "等",
];

/// 句末缩写（其后的句点不断句）
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "vs", "dr", "mr", "mrs", "ms", "inc", "ltd", "co", "st", "u.s", "u.k", "approx",
    "fig", "no",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '%' | '.' | ',' | '\'' | '’')
}

/// 归一化单个词：小写、去首尾标点、去所有格、复数还原（不含数字时）
fn normalize(raw: &str) -> Option<String> {
    let mut word = raw
        .trim_matches(|c: char| matches!(c, '.' | ',' | '\'' | '’'))
        .replace('’', "'")
        .to_lowercase();
    if let Some(stem) = word.strip_suffix("'s") {
        word = stem.to_string();
    }
    if word.is_empty() {
        return None;
    }
    let has_digit = word.chars().any(|c| c.is_ascii_digit());
    if !has_digit
        && word.chars().count() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !stopwords().contains(word.as_str())
    {
        word.pop();
    }
    Some(word)
}

/// 智能分词：根据文本内容自动选择分词策略
/// - 包含 CJK 字符时使用 jieba 分词（搜索引擎模式）
/// - 否则按非词字符切分
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let raw: Vec<String> = if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .flat_map(|s| {
                s.split(|c: char| !is_word_char(c) && !is_cjk(c))
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        text.split(|c: char| !is_word_char(c))
            .map(String::from)
            .collect()
    };

    raw.iter().filter_map(|w| normalize(w)).collect()
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 实义词：去掉停用词与单个拉丁字母
pub fn content_tokens(text: &str) -> Vec<String> {
    let stop = stopwords();
    tokenize(text)
        .into_iter()
        .filter(|t| !stop.contains(t.as_str()))
        .filter(|t| {
            let mut chars = t.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c.is_ascii_digit() || is_cjk(c),
                _ => true,
            }
        })
        .collect()
}

/// 实义词集合
pub fn content_set(text: &str) -> HashSet<String> {
    content_tokens(text).into_iter().collect()
}

/// 词干：去 -ing / -ed 与词尾 e，词尾 y 归一为 i（"reduced" 与 "reduce" 同干）；
/// 数值去掉百分号与千分位逗号；短词与非 ASCII 词原样返回
pub fn stem(token: &str) -> String {
    if token.chars().any(|c| c.is_ascii_digit()) {
        return token.replace(['%', ','], "");
    }
    if token.len() <= 4 || !token.chars().all(|c| c.is_ascii_alphabetic()) {
        return token.to_string();
    }
    let base = ["ing", "ed"]
        .iter()
        .find_map(|suffix| token.strip_suffix(suffix).filter(|b| b.len() >= 3))
        .unwrap_or(token);
    match base.as_bytes().last() {
        Some(b'e') if base.len() > 3 => base[..base.len() - 1].to_string(),
        Some(b'y') => format!("{}i", &base[..base.len() - 1]),
        _ => base.to_string(),
    }
}

/// 核验用词序列：实义词按出现顺序取词干
pub fn stemmed_terms(text: &str) -> Vec<String> {
    content_tokens(text).iter().map(|t| stem(t)).collect()
}

/// 数值词：含数字的词，去掉百分号与千分位逗号（"1,200" 与 "1200" 视为同一数）
pub fn numeric_tokens(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .map(|t| t.replace(|c: char| c == '%' || c == ',', ""))
        .collect()
}

/// tokens 中（去重后）有多少比例出现在 other 中；tokens 为空时为 0
pub fn coverage(tokens: &HashSet<String>, other: &HashSet<String>) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }
    tokens.iter().filter(|t| other.contains(*t)).count() as f32 / tokens.len() as f32
}

/// 计算两个词集合的相似度（Jaccard 相似度）
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f32 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f32;
    let union = set1.union(set2).count() as f32;
    intersection / union
}

fn ends_with_abbreviation(current: &str) -> bool {
    let body = current.trim_end_matches('.');
    let last = body
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .trim_start_matches(|c: char| matches!(c, '(' | '"' | '\''))
        .to_lowercase();
    if last.chars().count() == 1 && last.chars().all(|c| c.is_alphabetic()) {
        return true;
    }
    ABBREVIATIONS.contains(&last.as_str())
}

/// 切分句子：换行总是断句；英文句末符后需跟空白或行尾，小数点与常见缩写不断句
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            current.push(c);
            let boundary = match c {
                '。' | '！' | '？' => true,
                '.' | '!' | '?' => {
                    let at_break = chars.get(i + 1).map_or(true, |n| n.is_whitespace());
                    at_break && !(c == '.' && ends_with_abbreviation(&current))
                }
                _ => false,
            };
            if boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
        let rest = current.trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("编程") || t.contains("人工") || t.contains("智能")));
    }

    #[test]
    fn test_tokenize_english_keeps_numbers() {
        let tokens = tokenize("Approval times fell 12.5% to 1,200 days.");
        assert!(tokens.contains(&"approval".to_string()));
        assert!(tokens.contains(&"time".to_string()));
        assert!(tokens.contains(&"12.5%".to_string()));
        assert!(tokens.contains(&"1,200".to_string()));
        assert!(tokens.contains(&"day".to_string()));
    }

    #[test]
    fn test_possessive_and_plural() {
        let tokens = tokenize("The FDA's guidances and process");
        assert!(tokens.contains(&"fda".to_string()));
        assert!(tokens.contains(&"guidance".to_string()));
        assert!(tokens.contains(&"process".to_string()));
    }

    #[test]
    fn test_content_tokens_drop_stopwords_and_negation() {
        let tokens = content_tokens("The drug was not approved in 2023");
        assert_eq!(tokens, vec!["drug", "approved", "2023"]);
    }

    #[test]
    fn test_numeric_tokens_normalized() {
        let nums = numeric_tokens("Costs rose 15% to $1,200 in 2024.");
        assert!(nums.contains("15"));
        assert!(nums.contains("1200"));
        assert!(nums.contains("2024"));
        assert_eq!(nums.len(), 3);
    }

    #[test]
    fn test_stem_aligns_inflections() {
        assert_eq!(stem("reduced"), stem("reduce"));
        assert_eq!(stem("shortened"), "shorten");
        assert_eq!(stem("therapie"), stem("therapy"));
        assert_eq!(stem("1,200"), "1200");
        assert_eq!(stem("time"), "time");
        assert_ne!(stem("increased"), stem("reduced"));
        assert_eq!(
            stemmed_terms("Sponsors reduced enrollment time"),
            vec!["sponsor", "reduc", "enrollment", "time"]
        );
    }

    #[test]
    fn test_coverage() {
        let claim = content_set("accelerated approval pathway");
        let evidence = content_set("The accelerated approval pathway shortens review.");
        assert_eq!(coverage(&claim, &evidence), 1.0);
        assert_eq!(coverage(&HashSet::new(), &evidence), 0.0);
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("你好"));
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }

    #[test]
    fn test_jaccard_similarity() {
        let set1 = tokenize_to_set("我喜欢编程");
        let set2 = tokenize_to_set("我也喜欢编程");
        assert!(jaccard_similarity(&set1, &set2) > 0.0);
    }

    #[test]
    fn test_split_sentences() {
        let text = "Review times fell to 8.5 months. The U.S. market grew, e.g. in oncology!\nDear team,";
        let s = split_sentences(text);
        assert_eq!(
            s,
            vec![
                "Review times fell to 8.5 months.",
                "The U.S. market grew, e.g. in oncology!",
                "Dear team,"
            ]
        );
    }

    #[test]
    fn test_split_sentences_cjk() {
        let s = split_sentences("审批时间缩短。成本上升！");
        assert_eq!(s, vec!["审批时间缩短。", "成本上升！"]);
    }
}
