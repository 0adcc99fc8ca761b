//! Prompt assembly and citation handling for grounded question answering.
//!
//! Retrieved chunks are rendered into a numbered context block; the system
//! prompt pins the grounding policy. In strict mode the model must refuse
//! out-of-evidence questions with the fixed sentinel; in the default mode it
//! may summarize partially but must mark gaps with the same sentinel. Both
//! modes require a terminal `[출처]` section citing the used `[C#]` ids,
//! which [`parse_citations`] extracts back out of the finished answer.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::models::Retrieved;

/// Fixed refusal sentinel for out-of-evidence answers.
pub const NO_EVIDENCE_SENTINEL: &str = "자료에 근거가 없습니다.";

/// Warning appended to the message meta when a strict-mode answer carries no
/// citations.
pub const NO_CITATION_WARNING: &str = "주의: 답변에 [C#] 인용이 없습니다";

/// Render retrieved chunks as a numbered evidence block.
///
/// Each entry is headed `[C{rank}] ({doc_name} / p.{page})` with the chunk
/// text below; entries are separated by blank lines. Ranks are 1-based and
/// match the citation ids the model is asked to emit.
pub fn build_context_block(hits: &[Retrieved]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[C{}] ({} / p.{})\n{}",
                i + 1,
                hit.chunk.doc_name,
                hit.chunk.page,
                hit.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The grounding-policy system prompt for the requested mode.
pub fn system_prompt(strict: bool) -> String {
    if strict {
        format!(
            "당신은 제공된 근거 자료만 사용해 답변하는 문서 기반 어시스턴트입니다. \
             근거 자료에 없는 내용은 절대 추측하거나 외부 지식으로 보완하지 마세요. \
             근거가 부족하면 정확히 \"{}\" 라고만 답하세요. \
             답변 마지막에는 반드시 [출처] 섹션을 두고 실제로 사용한 [C#] 번호를 나열하세요. \
             답변은 한국어로 작성하세요.",
            NO_EVIDENCE_SENTINEL
        )
    } else {
        format!(
            "당신은 제공된 근거 자료를 우선 사용해 답변하는 문서 기반 어시스턴트입니다. \
             자료가 부분적이면 부분 요약을 제공하되, 근거가 없는 부분은 \"{}\" 로 표시하세요. \
             답변 마지막에는 반드시 [출처] 섹션을 두고 실제로 사용한 [C#] 번호를 나열하세요. \
             답변은 한국어로 작성하세요.",
            NO_EVIDENCE_SENTINEL
        )
    }
}

/// The user prompt: evidence block, question, and the closing citation
/// instruction.
pub fn user_prompt(context_block: &str, question: &str) -> String {
    format!(
        "[근거]\n{}\n\n[질문]\n{}\n\n위 [근거]만 참고하여 답변하세요. \
         답변 끝에 [출처] 섹션을 추가하고 사용한 [C#] 인용 번호를 나열하세요.",
        context_block, question
    )
}

/// One row of the retrieved-context panel shown when the caller asked for it.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    /// 1-based rank, matching the `[C#]` id.
    pub rank: usize,
    pub doc_name: String,
    pub page: u32,
    pub score: f32,
    /// Whether the answer actually cited this chunk.
    pub used: bool,
    pub text: String,
}

/// Build the context panel from the retrieval list and the parsed citation
/// set.
pub fn context_panel(hits: &[Retrieved], citations: &BTreeSet<u32>) -> Vec<ContextEntry> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| ContextEntry {
            rank: i + 1,
            doc_name: hit.chunk.doc_name.clone(),
            page: hit.chunk.page,
            score: hit.score,
            used: citations.contains(&(i as u32 + 1)),
            text: hit.chunk.text.clone(),
        })
        .collect()
}

/// Collect every citation id `[C#]` appearing in the answer.
pub fn parse_citations(answer: &str) -> BTreeSet<u32> {
    static CITATION: OnceLock<Regex> = OnceLock::new();
    let re = CITATION.get_or_init(|| Regex::new(r"\[C(\d+)\]").expect("valid citation pattern"));
    re.captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(doc_name: &str, page: u32, text: &str, score: f32) -> Retrieved {
        Retrieved {
            chunk: Chunk {
                id: format!("d|p{}|c0", page),
                doc_id: "d".to_string(),
                doc_name: doc_name.to_string(),
                page,
                ordinal: 0,
                text: text.to_string(),
                embedding: Some(vec![1.0]),
                extra: Default::default(),
            },
            score,
        }
    }

    #[test]
    fn context_block_numbers_from_one() {
        let hits = vec![
            hit("manual.pdf", 3, "첫 번째 근거", 0.9),
            hit("notes.txt", 1, "두 번째 근거", 0.7),
        ];
        let block = build_context_block(&hits);
        assert!(block.starts_with("[C1] (manual.pdf / p.3)\n첫 번째 근거"));
        assert!(block.contains("\n\n[C2] (notes.txt / p.1)\n두 번째 근거"));
    }

    #[test]
    fn system_prompt_carries_sentinel_and_source_section() {
        for strict in [true, false] {
            let prompt = system_prompt(strict);
            assert!(prompt.contains(NO_EVIDENCE_SENTINEL));
            assert!(prompt.contains("[출처]"));
            assert!(prompt.contains("[C#]"));
        }
    }

    #[test]
    fn user_prompt_structure() {
        let prompt = user_prompt("[C1] (a.txt / p.1)\n내용", "질문입니다?");
        assert!(prompt.starts_with("[근거]\n"));
        assert!(prompt.contains("[질문]\n질문입니다?"));
        assert!(prompt.contains("[출처]"));
    }

    #[test]
    fn citations_are_collected_as_a_set() {
        let answer = "요약입니다 [C1][C3]. 추가로 [C1] 참고.\n[출처] [C1] [C3]";
        let cites = parse_citations(answer);
        assert_eq!(cites, BTreeSet::from([1, 3]));
    }

    #[test]
    fn no_citations_yields_empty_set() {
        assert!(parse_citations("자료에 근거가 없습니다.").is_empty());
        assert!(parse_citations("[C] [Cx] [D1]").is_empty());
    }

    #[test]
    fn multi_digit_citations_parse() {
        assert_eq!(parse_citations("[C12]"), BTreeSet::from([12]));
    }

    #[test]
    fn context_panel_marks_used_entries() {
        let hits = vec![
            hit("a.pdf", 1, "첫째", 0.9),
            hit("b.pdf", 2, "둘째", 0.8),
            hit("c.pdf", 3, "셋째", 0.7),
        ];
        let citations = BTreeSet::from([1, 3]);
        let panel = context_panel(&hits, &citations);
        assert_eq!(panel.len(), 3);
        assert!(panel[0].used);
        assert!(!panel[1].used);
        assert!(panel[2].used);
        assert_eq!(panel[1].rank, 2);
        assert_eq!(panel[1].doc_name, "b.pdf");
    }
}
