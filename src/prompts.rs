//! Prompt builders for every model-backed stage.
//!
//! Each builder returns the full message list for one call. Output contracts
//! are stated inside the prompts and enforced afterwards by the normalizers
//! in `parse`; the two must agree on key names.

use crate::intake::IntakeRecord;
use crate::model::ChatMessage;
use crate::parse::CriticGrade;
use crate::types::{Diagnosis, DiagnosisCandidate, Document, DrugEntry};

fn render_docs(docs: &[Document]) -> String {
    serde_json::to_string_pretty(docs).unwrap_or_default()
}

/// How strongly generation should lean on retrieved context, keyed by the
/// upstream grade. An ungraded run is treated as trustworthy context.
fn context_weight(score: Option<u8>) -> &'static str {
    match score {
        None => "检索资料与症状高度相关，请充分结合资料内容作答。",
        Some(s) if s >= 4 => "检索资料与症状高度相关，请充分结合资料内容作答。",
        Some(s) if s >= 2 => "检索资料与症状部分相关，请谨慎参考资料，同时结合医学常识作答。",
        Some(_) => "检索资料与症状相关性较低，请主要依据医学常识作答，资料仅作背景参考。",
    }
}

pub fn normalizer(intake: &IntakeRecord) -> Vec<ChatMessage> {
    let system = "你是医疗症状标准化助手。请将患者的原始症状描述整理为一段规范、完整的中文症状描述，\
并提取用于医学知识库检索的关键词列表。\
只输出 JSON，格式：{\"optimized_symptoms\": \"...\", \"rag_keywords\": [\"...\"]}。\
不要输出任何其他内容。";
    let user = format!(
        "患者信息：\n- 部位：{}\n- 症状：{}\n- 其他症状：{}\n- 严重程度：{}\n- 持续时间：{}",
        intake.body_part,
        intake.display_symptoms().join("、"),
        intake.other_symptoms.as_deref().unwrap_or("无"),
        intake.severity_word(),
        intake.duration.phrase(),
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn quality(symptoms: &str, keywords: &[String]) -> Vec<ChatMessage> {
    let system = "你是医疗文本质量评审员。请评估下面的标准化症状描述和检索关键词的质量：\
描述是否完整通顺、关键词是否覆盖主要症状且适合医学检索。\
评分 0-5 分，3 分及以上视为合格。\
只输出 JSON，格式：{\"score\": 0-5, \"comment\": \"...\", \"isValid\": true/false}。";
    let user = format!(
        "标准化症状描述：{symptoms}\n检索关键词：{}",
        keywords.join("、")
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn refine(
    intake: &IntakeRecord,
    symptoms: &str,
    keywords: &[String],
    grade: &CriticGrade,
) -> Vec<ChatMessage> {
    let system = "你是医疗症状标准化助手。上一轮的标准化结果未通过质量评审，\
请根据评审意见改进症状描述和检索关键词。\
只输出 JSON，格式：{\"optimized_symptoms\": \"...\", \"rag_keywords\": [\"...\"]}。";
    let user = format!(
        "患者原始信息：\n- 部位：{}\n- 症状：{}\n- 其他症状：{}\n- 严重程度：{}\n- 持续时间：{}\n\n\
上一轮结果：\n- 描述：{symptoms}\n- 关键词：{}\n\n\
评审意见（{} 分）：{}",
        intake.body_part,
        intake.display_symptoms().join("、"),
        intake.other_symptoms.as_deref().unwrap_or("无"),
        intake.severity_word(),
        intake.duration.phrase(),
        keywords.join("、"),
        grade.score,
        grade.comment,
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn relevance(symptoms: &str, docs: &[Document]) -> Vec<ChatMessage> {
    let system = "你是医学检索质量评审员。请评估检索到的资料与患者症状的相关程度。\
评分标准：5 分为高度相关且可直接支撑诊断，3-4 分为较相关，1-2 分为弱相关，0 分为完全无关。\
只输出 JSON，格式：{\"ragScore\": 0-5, \"ragComment\": \"...\"}。";
    let user = format!(
        "患者症状：{symptoms}\n\n检索资料：\n{}",
        render_docs(docs)
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn diagnosis(
    symptoms: &str,
    docs: &[Document],
    score: Option<u8>,
    comment: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "你是临床辅助诊断助手。请基于患者症状给出 3 个最可能的诊断候选，\
每个候选包含疾病名称、概率（0-1，三项之和为 1）和简要说明，\
并给出 3 条详细就医建议和 3-10 条简短生活建议。\
{}\
只输出 JSON，格式：{{\"results\": [{{\"condition\": \"...\", \"probability\": 0.0, \"description\": \"...\"}}], \
\"recommendations\": [\"...\"], \"recomm_short\": [\"...\"]}}。",
        context_weight(score)
    );
    let mut user = format!(
        "患者症状：{symptoms}\n\n检索资料：\n{}",
        render_docs(docs)
    );
    if !comment.is_empty() {
        user.push_str(&format!("\n\n资料相关性评审意见：{comment}"));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn evidence(diagnosis: &Diagnosis, docs: &[Document]) -> Vec<ChatMessage> {
    let system = "你是医学诊断评审员。请评估下面的诊断结论与检索资料之间的证据支撑程度。\
评分 0-5 分：5 分为资料充分支撑诊断，0 分为资料与诊断无关。\
只输出 JSON，格式：{\"diagnosisScore\": 0-5, \"diagnosisComment\": \"...\"}。";
    let rendered = serde_json::to_string_pretty(&diagnosis.results).unwrap_or_default();
    let user = format!(
        "诊断结论：\n{rendered}\n\n检索资料：\n{}",
        render_docs(docs)
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn drug(
    condition: &str,
    context: &str,
    score: Option<u8>,
    comment: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "你是临床用药推荐助手。请针对给定诊断推荐 1-3 种常用药物，\
每种药物包含名称、用法用量和注意事项。\
{}\
只输出 JSON，格式：{{\"drugs\": [{{\"condition\": \"...\", \"recommended_drugs\": \
[{{\"name\": \"...\", \"usage\": \"...\", \"notes\": \"...\"}}]}}]}}。",
        context_weight(score)
    );
    let mut user = format!("诊断：{condition}\n\n参考资料：\n{context}");
    if !comment.is_empty() {
        user.push_str(&format!("\n\n诊断证据评审意见：{comment}"));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn drug_summary(entries: &[DrugEntry]) -> Vec<ChatMessage> {
    let system = "你是临床用药顾问。请根据下面各诊断的用药推荐，\
写一段简短的总体用药提示，提醒患者注意药物相互作用和就医原则。\
直接输出中文文本，不要输出 JSON。";
    let rendered = serde_json::to_string_pretty(entries).unwrap_or_default();
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("用药推荐：\n{rendered}")),
    ]
}

pub fn reviewer(
    original_summary: &str,
    optimized: &str,
    results: &[DiagnosisCandidate],
) -> Vec<ChatMessage> {
    let system = "你是资深临床医生。请校验下面的诊断概率分配是否与患者症状相符，\
必要时调整各候选的概率（三项之和保持为 1），并给出一句校验意见。\
只输出 JSON，格式：{\"review_comment\": \"...\", \"results\": \
[{\"condition\": \"...\", \"probability\": 0.0, \"description\": \"...\"}]}。";
    let rendered = serde_json::to_string_pretty(results).unwrap_or_default();
    let user = format!(
        "患者原始描述：{original_summary}\n标准化描述：{optimized}\n\n当前诊断：\n{rendered}"
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intake() -> IntakeRecord {
        serde_json::from_value(json!({
            "body_part": "head",
            "symptom_names": ["headache"],
            "severity": 3,
            "duration": "1To3Days"
        }))
        .unwrap()
    }

    #[test]
    fn normalizer_prompt_carries_intake_fields() {
        let messages = normalizer(&intake());
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("optimized_symptoms"));
        assert!(messages[1].content.contains("head"));
        assert!(messages[1].content.contains("中等"));
        assert!(messages[1].content.contains("1至3天"));
    }

    #[test]
    fn context_weight_tiers() {
        assert!(context_weight(None).contains("高度相关"));
        assert!(context_weight(Some(5)).contains("高度相关"));
        assert!(context_weight(Some(4)).contains("高度相关"));
        assert!(context_weight(Some(3)).contains("部分相关"));
        assert!(context_weight(Some(2)).contains("部分相关"));
        assert!(context_weight(Some(1)).contains("相关性较低"));
        assert!(context_weight(Some(0)).contains("相关性较低"));
    }

    #[test]
    fn diagnosis_prompt_embeds_docs_and_comment() {
        let docs = vec![Document {
            doc_id: "d1".to_string(),
            score: 0.8,
            snippet: "偏头痛诊断要点".to_string(),
        }];
        let messages = diagnosis("患者头痛", &docs, Some(4), "覆盖主要症状");
        assert!(messages[1].content.contains("偏头痛诊断要点"));
        assert!(messages[1].content.contains("覆盖主要症状"));
        assert!(messages[0].content.contains("recomm_short"));
    }

    #[test]
    fn refine_prompt_includes_critic_feedback() {
        let grade = CriticGrade {
            score: 2,
            comment: "关键词过于宽泛".to_string(),
            is_valid: false,
        };
        let messages = refine(&intake(), "患者头部不适", &["头部".to_string()], &grade);
        assert!(messages[1].content.contains("关键词过于宽泛"));
        assert!(messages[1].content.contains("患者头部不适"));
    }
}
