//! 题块解析引擎
//! 从规范化文本中识别 `题干 [标签,标签]{难度} Ans: 答案` 结构的题块

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::models::{Difficulty, NewEntry};

/// 语法版本选择
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrammarSelection {
    /// 探测文本中是否出现花括号难度标记
    #[default]
    Auto,
    /// `[tags] Ans:`，无难度标记
    Classic,
    /// `[tags]{difficulty} Ans:`，难度标记可省略
    Rated,
}

/// 题块头：标签列表、可选难度与 `Ans:` 标记
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub start: usize,
    pub end: usize,
    pub raw_tags: String,
    pub raw_difficulty: Option<String>,
}

/// 一种题块语法
pub trait BlockGrammar: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// 按出现顺序返回所有题块头
    fn headers(&self, text: &str) -> Vec<BlockHeader>;
}

/// 早期语法：`[tags] Ans:`
#[derive(Debug)]
pub struct ClassicGrammar {
    header: Regex,
}

impl ClassicGrammar {
    pub fn new() -> Result<Self> {
        Ok(Self {
            header: Regex::new(r"\[([^\[\]]+)\]\s*Ans:")?,
        })
    }
}

impl BlockGrammar for ClassicGrammar {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn headers(&self, text: &str) -> Vec<BlockHeader> {
        self.header
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                Some(BlockHeader {
                    start: whole.start(),
                    end: whole.end(),
                    raw_tags: cap.get(1)?.as_str().to_string(),
                    raw_difficulty: None,
                })
            })
            .collect()
    }
}

/// 带难度语法：`[tags]{difficulty} Ans:`
#[derive(Debug)]
pub struct RatedGrammar {
    header: Regex,
    detector: Regex,
}

impl RatedGrammar {
    pub fn new() -> Result<Self> {
        Ok(Self {
            header: Regex::new(r"\[([^\[\]]+)\]\s*(?:\{([^{}]*)\})?\s*Ans:")?,
            detector: Regex::new(r"\[[^\[\]]+\]\s*\{[^{}]*\}\s*Ans:")?,
        })
    }

    /// 文本中是否至少出现一次花括号难度标记
    pub fn detects(&self, text: &str) -> bool {
        self.detector.is_match(text)
    }
}

impl BlockGrammar for RatedGrammar {
    fn name(&self) -> &'static str {
        "rated"
    }

    fn headers(&self, text: &str) -> Vec<BlockHeader> {
        self.header
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                Some(BlockHeader {
                    start: whole.start(),
                    end: whole.end(),
                    raw_tags: cap.get(1)?.as_str().to_string(),
                    raw_difficulty: cap.get(2).map(|m| m.as_str().to_string()),
                })
            })
            .collect()
    }
}

/// 解析出的题块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedBlock {
    pub question: String,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
    pub answer: String,
}

impl ParsedBlock {
    pub fn into_entry(self, source_document_id: Option<String>, topic_type_code: Option<i64>) -> NewEntry {
        NewEntry {
            source_document_id,
            topic_type_code,
            question: self.question,
            answer: self.answer,
            tags: self.tags,
            difficulty: self.difficulty,
        }
    }
}

/// 被丢弃的题块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedBlock {
    pub index: usize,
    pub reason: String,
}

/// 解析报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseReport {
    pub grammar: String,
    pub blocks: Vec<ParsedBlock>,
    pub dropped: Vec<DroppedBlock>,
}

/// 题块解析器
#[derive(Debug)]
pub struct QuestionParser {
    selection: GrammarSelection,
    classic: ClassicGrammar,
    rated: RatedGrammar,
    line_marker: Regex,
    inline_marker: Regex,
}

impl QuestionParser {
    pub fn new(selection: GrammarSelection) -> Result<Self> {
        Ok(Self {
            selection,
            classic: ClassicGrammar::new()?,
            rated: RatedGrammar::new()?,
            line_marker: Regex::new(r"(?m)^[ \t]*(Q\d+:)")?,
            inline_marker: Regex::new(r"\bQ\d+:")?,
        })
    }

    pub fn selection(&self) -> GrammarSelection {
        self.selection
    }

    /// 按配置选出本次使用的语法
    pub fn grammar_for(&self, text: &str) -> &dyn BlockGrammar {
        match self.selection {
            GrammarSelection::Classic => &self.classic,
            GrammarSelection::Rated => &self.rated,
            GrammarSelection::Auto => {
                if self.rated.detects(text) {
                    &self.rated
                } else {
                    &self.classic
                }
            }
        }
    }

    pub fn parse(&self, text: &str) -> Vec<ParsedBlock> {
        self.parse_report(text).blocks
    }

    pub fn parse_report(&self, text: &str) -> ParseReport {
        let grammar = self.grammar_for(text);
        let mut report = ParseReport {
            grammar: grammar.name().to_string(),
            ..Default::default()
        };

        if text.trim().is_empty() {
            log::warn!("No text provided to question parser");
            return report;
        }

        let headers = grammar.headers(text);
        if headers.is_empty() {
            log::warn!("No question blocks matched ({} grammar)", grammar.name());
            return report;
        }

        // 每个题干的起点；后一题的起点同时是前一题答案的终点
        let mut question_starts = Vec::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let region_start = if i == 0 { 0 } else { headers[i - 1].end };
            let region = &text[region_start..header.start];
            let offset = if i == 0 {
                self.first_question_offset(region)
            } else {
                self.next_question_offset(region)
            };
            question_starts.push(region_start + offset);
        }

        for (i, header) in headers.iter().enumerate() {
            let question = text[question_starts[i]..header.start].trim();
            let answer_end = question_starts.get(i + 1).copied().unwrap_or(text.len());
            let answer = text[header.end..answer_end].trim();

            let reason = if question.is_empty() {
                Some("empty question")
            } else if answer.is_empty() {
                Some("empty answer")
            } else {
                None
            };
            if let Some(reason) = reason {
                log::warn!(
                    "{}",
                    Error::InvalidEntry {
                        index: i,
                        reason: reason.to_string(),
                    }
                );
                report.dropped.push(DroppedBlock {
                    index: i,
                    reason: reason.to_string(),
                });
                continue;
            }

            report.blocks.push(ParsedBlock {
                question: question.to_string(),
                tags: split_tags(&header.raw_tags),
                difficulty: resolve_difficulty(i, header.raw_difficulty.as_deref()),
                answer: answer.to_string(),
            });
        }

        report
    }

    /// 第一题从首个题号开始，没有题号时从文本开头开始
    fn first_question_offset(&self, region: &str) -> usize {
        self.inline_marker
            .find(region)
            .map(|m| m.start())
            .unwrap_or(0)
    }

    /// 在“上一题答案 + 本题题干”的区间里找本题起点：
    /// 行首题号 > 行内题号 > 最后一个换行之后；都没有时题干为空
    fn next_question_offset(&self, region: &str) -> usize {
        if let Some(cap) = self.line_marker.captures_iter(region).last() {
            if let Some(m) = cap.get(1) {
                return m.start();
            }
        }
        if let Some(m) = self.inline_marker.find_iter(region).last() {
            return m.start();
        }
        let content_end = region.trim_end().len();
        match region[..content_end].rfind('\n') {
            Some(pos) => pos + 1,
            None => region.len(),
        }
    }
}

/// 逗号分隔，去空白、去空项、去重并保持顺序
fn split_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn resolve_difficulty(index: usize, raw: Option<&str>) -> Difficulty {
    match raw.map(str::trim) {
        None | Some("") => Difficulty::Medium,
        Some(token) => Difficulty::from_token(token).unwrap_or_else(|| {
            log::warn!(
                "Block {} has unknown difficulty {:?}, using medium",
                index,
                token
            );
            Difficulty::Medium
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> QuestionParser {
        QuestionParser::new(GrammarSelection::Auto).unwrap()
    }

    #[test]
    fn test_single_rated_block() {
        let blocks = parser().parse("Q1: What is 2+2? [math,arithmetic]{easy} Ans: 4");

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].question, "Q1: What is 2+2?");
        assert_eq!(blocks[0].tags, vec!["math", "arithmetic"]);
        assert_eq!(blocks[0].difficulty, Difficulty::Easy);
        assert_eq!(blocks[0].answer, "4");
    }

    #[test]
    fn test_empty_and_unstructured_text() {
        let p = parser();
        assert!(p.parse("").is_empty());
        assert!(p.parse("   \n\t").is_empty());
        assert!(p.parse("Just some notes.\nAns: nothing here").is_empty());
    }

    #[test]
    fn test_classic_blocks_with_multiline_answers() {
        let text = "Course notes\n\
                    Q1: Define an array.\n[arrays, basics]\nAns: A collection of items\nstored contiguously.\n\n\
                    Q2: What is a stack?\n[stacks] Ans: LIFO structure";
        let report = parser().parse_report(text);

        assert_eq!(report.grammar, "classic");
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[0].question, "Q1: Define an array.");
        assert_eq!(report.blocks[0].tags, vec!["arrays", "basics"]);
        assert_eq!(
            report.blocks[0].answer,
            "A collection of items\nstored contiguously."
        );
        assert_eq!(report.blocks[0].difficulty, Difficulty::Medium);
        assert_eq!(report.blocks[1].question, "Q2: What is a stack?");
        assert_eq!(report.blocks[1].answer, "LIFO structure");
    }

    #[test]
    fn test_multiline_question_with_marker() {
        let text = "Q1: Consider the list below.\nWhich item is first?\n[lists]{medium} Ans: the head";
        let blocks = parser().parse(text);

        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0].question,
            "Q1: Consider the list below.\nWhich item is first?"
        );
    }

    #[test]
    fn test_blocks_without_question_numbers_split_on_lines() {
        let text = "What is 2+2? [math] Ans: 4\nWhat is 3+3? [math] Ans: 6";
        let blocks = parser().parse(text);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].answer, "4");
        assert_eq!(blocks[1].question, "What is 3+3?");
        assert_eq!(blocks[1].answer, "6");
    }

    #[test]
    fn test_inline_question_marker() {
        let blocks = parser().parse("Q1: 1+1? [math] Ans: 2 Q2: 2+2? [math] Ans: 4");

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].answer, "2");
        assert_eq!(blocks[1].question, "Q2: 2+2?");
    }

    #[test]
    fn test_echoed_answer_marker_is_kept() {
        let blocks = parser().parse("Q1: Echo? [misc] Ans: Ans: echoed");

        assert_eq!(blocks[0].answer, "Ans: echoed");
    }

    #[test]
    fn test_invalid_block_is_dropped_and_parsing_continues() {
        let text = "Q1: Missing answer [x] Ans:\nQ2: Present [y] Ans: yes";
        let report = parser().parse_report(text);

        assert_eq!(report.blocks.len(), 1);
        assert_eq!(report.blocks[0].question, "Q2: Present");
        assert_eq!(
            report.dropped,
            vec![DroppedBlock {
                index: 0,
                reason: "empty answer".to_string()
            }]
        );
    }

    #[test]
    fn test_tags_are_trimmed_and_deduplicated() {
        let blocks = parser().parse("Q1: Tags? [ math, ,math , algebra ] Ans: ok");

        assert_eq!(blocks[0].tags, vec!["math", "algebra"]);
    }

    #[test]
    fn test_rated_grammar_optional_and_cased_difficulty() {
        let text = "Q1: a? [x]{ HARD } Ans: 1\nQ2: b? [y] Ans: 2\nQ3: c? [z]{weird} Ans: 3";
        let report = parser().parse_report(text);

        assert_eq!(report.grammar, "rated");
        let difficulties: Vec<_> = report.blocks.iter().map(|b| b.difficulty).collect();
        assert_eq!(
            difficulties,
            vec![Difficulty::Hard, Difficulty::Medium, Difficulty::Medium]
        );
    }

    #[test]
    fn test_classic_selection_ignores_rated_headers() {
        let classic = QuestionParser::new(GrammarSelection::Classic).unwrap();
        assert!(classic.parse("Q1: 2+2? [math]{easy} Ans: 4").is_empty());

        let rated = QuestionParser::new(GrammarSelection::Rated).unwrap();
        assert_eq!(rated.parse("Q1: 2+2? [math] Ans: 4").len(), 1);
    }

    #[test]
    fn test_brackets_inside_question_text() {
        let blocks = parser().parse("Q1: What does a[0] return? [arrays] Ans: the first element");

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].question, "Q1: What does a[0] return?");
        assert_eq!(blocks[0].tags, vec!["arrays"]);
    }

    #[test]
    fn test_preamble_before_first_marker_is_skipped() {
        let blocks = parser().parse("Chapter 3 quiz\n\nQ1: Capital of France? [geo] Ans: Paris");

        assert_eq!(blocks[0].question, "Q1: Capital of France?");
    }
}
