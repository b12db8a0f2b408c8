// ABOUTME: Prompt construction for stretching guide generation
// ABOUTME: Builds the system prompt, user prompt with retrieved exercises, and the fallback guide
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Guide Prompts
//!
//! The system prompt is loaded at compile time from a markdown file for easy
//! maintenance. The user prompt serializes the user's condition together with
//! the retrieved corpus exercises, so the model grounds its guide in the
//! corpus material. The fallback guide is a deterministic template used when
//! the generation backend is unavailable or returns nothing.

use crate::corpus::SearchHit;
use crate::models::UserInput;

/// Stretching coach system prompt
pub const GUIDE_SYSTEM_PROMPT: &str = include_str!("stretch_guide_system.md");

/// Get the system prompt for guide generation
#[must_use]
pub const fn get_guide_system_prompt() -> &'static str {
    GUIDE_SYSTEM_PROMPT
}

/// Build the user prompt from the user's condition and retrieved exercises
///
/// The condition is serialized as JSON and each retrieved exercise is listed
/// with its steps, effects, cautions, and source URL when present. Exercises
/// appear in ranked order.
#[must_use]
pub fn build_guide_prompt(input: &UserInput, hits: &[SearchHit]) -> String {
    let user_data = serde_json::json!({
        "age": input.age,
        "gender": input.gender,
        "occupation": input.occupation,
        "lifestyle": input.lifestyle,
        "selected_body_parts": input.selected_body_parts,
        "pain_level": input.pain_level,
        "pain_description": input.pain_description,
    });

    let mut prompt = String::from("사용자 정보:\n");
    prompt.push_str(&serde_json::to_string_pretty(&user_data).unwrap_or_default());
    prompt.push_str("\n\n관련 스트레칭 정보:\n");

    if hits.is_empty() {
        prompt.push_str("(검색된 스트레칭 정보 없음)\n");
    }

    for (i, hit) in hits.iter().enumerate() {
        let record = &hit.record;
        prompt.push_str(&format!("\n{}. {} ({})\n", i + 1, record.title, record.muscle));
        if !record.summary.is_empty() {
            prompt.push_str(&format!("   요약: {}\n", record.summary));
        }
        if !record.steps.is_empty() {
            prompt.push_str("   실행 방법:\n");
            for step in &record.steps {
                prompt.push_str(&format!("   - {step}\n"));
            }
        }
        if !record.effects.is_empty() {
            prompt.push_str(&format!("   효과: {}\n", record.effects.join(", ")));
        }
        if !record.cautions.is_empty() {
            prompt.push_str(&format!("   주의사항: {}\n", record.cautions.join(", ")));
        }
        if let Some(ref url) = record.source_url {
            prompt.push_str(&format!("   출처: {url}\n"));
        }
    }

    prompt.push_str(
        "\n위 정보를 바탕으로 사용자에게 맞는 스트레칭 분석과 가이드를 작성해주세요.",
    );
    prompt
}

/// Deterministic fallback guide used when the backend produces nothing
///
/// Interpolates the user's body parts and occupation, so the guide remains
/// personally relevant even without model output.
#[must_use]
pub fn fallback_guide(input: &UserInput) -> String {
    let body_parts = input.selected_body_parts.trim();
    let occupation = input.occupation.trim();

    format!(
        "사용자 상태 분석:\n\
         {occupation} 직업 특성상 {body_parts} 부위에 부담이 누적되기 쉽습니다. \
         통증 강도가 {pain_level}/10으로 보고되어 꾸준한 스트레칭과 자세 교정이 필요합니다.\n\n\
         추천 스트레칭:\n\
         1. {body_parts} 긴장 완화 스트레칭\n\
         \x20  - 바른 자세로 앉아 해당 부위를 천천히 늘려줍니다\n\
         \x20  - 30초간 유지한 후 반대쪽도 실시합니다\n\
         \x20  - 하루 2-3회 반복하세요\n\n\
         2. 전신 이완 스트레칭\n\
         \x20  - 어깨를 천천히 위로 올렸다가 내립니다 (10회)\n\
         \x20  - 깊게 호흡하며 몸의 긴장을 풀어줍니다\n\n\
         주의사항:\n\
         - 갑작스러운 통증이 있다면 즉시 중단하세요\n\
         - 천천히 호흡하며 진행하세요\n\n\
         생활습관 개선 제안:\n\
         - 30분마다 휴식을 취하세요\n\
         - 바른 자세로 앉는 습관을 기르세요",
        pain_level = input.pain_level,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ExerciseRecord;
    use crate::models::Gender;

    fn sample_input() -> UserInput {
        UserInput {
            age: 29,
            gender: Gender::Female,
            occupation: "사무직 회사원".to_string(),
            lifestyle: "하루 8시간 이상 앉아서 근무".to_string(),
            selected_body_parts: "목, 어깨".to_string(),
            pain_level: 7,
            pain_description: "오후가 되면 목과 어깨가 뻐근하고 무겁습니다".to_string(),
        }
    }

    fn sample_hit() -> SearchHit {
        SearchHit {
            record: ExerciseRecord {
                id: "neck_0".to_string(),
                muscle: "목".to_string(),
                title: "턱 당기기 스트레칭".to_string(),
                summary: "거북목 완화에 도움".to_string(),
                steps: vec!["턱을 뒤로 당긴다".to_string(), "5초 유지".to_string()],
                effects: vec!["목 통증 완화".to_string()],
                cautions: vec!["급격한 반동 금지".to_string()],
                source_url: Some("https://example.com/neck".to_string()),
                occupations: vec!["사무직".to_string()],
            },
            score: 0.91,
        }
    }

    #[test]
    fn prompt_includes_user_data_and_exercises() {
        let prompt = build_guide_prompt(&sample_input(), &[sample_hit()]);
        assert!(prompt.contains("사무직 회사원"));
        assert!(prompt.contains("턱 당기기 스트레칭"));
        assert!(prompt.contains("턱을 뒤로 당긴다"));
        assert!(prompt.contains("https://example.com/neck"));
    }

    #[test]
    fn prompt_handles_empty_retrieval() {
        let prompt = build_guide_prompt(&sample_input(), &[]);
        assert!(prompt.contains("검색된 스트레칭 정보 없음"));
    }

    #[test]
    fn fallback_interpolates_body_parts_and_occupation() {
        let input = sample_input();
        let guide = fallback_guide(&input);
        assert!(guide.contains("목, 어깨"));
        assert!(guide.contains("사무직 회사원"));
        assert!(guide.contains("7/10"));
    }

    #[test]
    fn system_prompt_defines_response_sections() {
        let prompt = get_guide_system_prompt();
        assert!(prompt.contains("[분석]"));
        assert!(prompt.contains("[가이드]"));
        assert!(prompt.contains("[참고 자료]"));
    }
}
