//! Prompt templates for the architect model.
//!
//! Templates use `{name}` placeholders filled by [`render`]. User overrides
//! from `[templates]` go through the same function, so they may use the
//! same placeholder names.

use quickpersona_core::PromptFormat;
use std::fmt;

/// Fill `{key}` placeholders. Unknown placeholders and literal braces are
/// left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

// ============================================================================
// Shrink intensity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intensity {
    #[default]
    Light,
    Medium,
    Extreme,
}

impl Intensity {
    /// Unknown input falls back to [`Intensity::Light`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "中度" | "medium" | "中" => Intensity::Medium,
            "极限" | "extreme" | "max" | "极" => Intensity::Extreme,
            _ => Intensity::Light,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Intensity::Light => "轻度",
            Intensity::Medium => "中度",
            Intensity::Extreme => "极限",
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Generation
// ============================================================================

const GENERATE_NATURAL: &str = r#"你是一位专业的 AI 人格设计师。请根据以下描述，生成一个完整、生动、有个性的人格设定。

用户描述：{description}

要求：
1. 使用自然流畅的语言描述人格
2. 包含以下要素（如果用户未提供，请合理创造）：
   - 基本身份（姓名、年龄、身份）
   - 性格特点（核心性格、行为模式）
   - 说话风格（语气、口癖、常用词汇）
   - 与用户的关系设定
   - 情感表达方式
3. 保持人格一致性和可信度
4. 直接输出人格设定内容，不要添加解释性文字

请生成人格设定："#;

const GENERATE_MARKDOWN: &str = r#"你是一位专业的 AI 人格设计师。请根据以下描述，使用 Markdown 格式生成结构化的人格设定。

用户描述：{description}

要求：
1. 使用标准 Markdown 格式，以 `# 角色名称` 开头
2. 依次包含章节：基本信息（姓名、年龄、身份、外貌特征）、性格特点、说话风格、关系设定、情感表达、背景故事、行为准则
3. 基本信息使用 `- **姓名**: xxx` 形式的列表
4. 如果用户未提供某些信息，请合理创造
5. 直接输出 Markdown 内容，不要添加解释

请生成人格设定："#;

const GENERATE_XML: &str = r#"你是一位专业的 AI 人格设计师。请根据以下描述，使用 XML 格式生成结构化的人格设定。

用户描述：{description}

要求：
1. 根标签为 <persona>
2. 内部依次包含：
   <identity>（<name>、<age>、<role>、<appearance>）
   <personality>（<core_traits> 下若干 <trait>，<behavior_patterns> 下若干 <pattern>）
   <speech_style>（<tone>、<verbal_tics>、<emoji_usage>）
   <relationship>（<with_user>、<interaction_style>）
   <emotional_expressions>（<happy>、<shy>、<angry>）
   <background>
   <guidelines>（<do>、<avoid>）
3. 如果用户未提供某些信息，请合理创造
4. 直接输出 XML 内容，不要添加解释

请生成人格设定："#;

const GENERATE_JSON: &str = r#"你是一位专业的 AI 人格设计师。请根据以下描述，使用 JSON 格式生成结构化的人格设定。

用户描述：{description}

要求：
1. 根对象只有一个键 "persona"，结构如下：
   {"persona": {"identity": {"name": "", "age": "", "role": "", "appearance": ""},
    "personality": {"core_traits": [], "behavior_patterns": []},
    "speech_style": {"tone": "", "verbal_tics": [], "emoji_usage": ""},
    "relationship": {"with_user": "", "interaction_style": ""},
    "emotional_expressions": {"happy": "", "shy": "", "angry": ""},
    "background": "",
    "guidelines": {"do": [], "avoid": []}}}
2. 如果用户未提供某些信息，请合理创造
3. 确保 JSON 格式有效，可被解析
4. 直接输出 JSON 内容，不要添加解释

请生成人格设定："#;

const GENERATE_YAML: &str = r#"你是一位专业的 AI 人格设计师。请根据以下描述，使用 YAML 格式生成结构化的人格设定。

用户描述：{description}

要求：
1. 根键为 persona，下含 identity（name/age/role/appearance）、personality（core_traits/behavior_patterns 列表）、speech_style（tone/verbal_tics/emoji_usage）、relationship（with_user/interaction_style）、emotional_expressions（happy/shy/angry）、background、guidelines（do/avoid 列表）
2. 如果用户未提供某些信息，请合理创造
3. 确保 YAML 格式有效，使用 2 空格缩进
4. 直接输出 YAML 内容，不要添加解释

请生成人格设定："#;

pub fn generate_template(format: PromptFormat) -> &'static str {
    match format {
        PromptFormat::Natural => GENERATE_NATURAL,
        PromptFormat::Markdown => GENERATE_MARKDOWN,
        PromptFormat::Xml => GENERATE_XML,
        PromptFormat::Json => GENERATE_JSON,
        PromptFormat::Yaml => GENERATE_YAML,
    }
}

/// Structure reminder appended to conversion and supplement prompts.
pub fn format_hint(format: PromptFormat) -> &'static str {
    match format {
        PromptFormat::Natural => "目标格式说明：\n使用自然流畅的语言描述，保持段落结构清晰，不使用特殊格式标记。",
        PromptFormat::Markdown => "目标格式说明：\n使用 Markdown 格式，包含标题(#)、列表(-)、加粗(**)等元素。\n结构包含：基本信息、性格特点、说话风格、关系设定、情感表达、背景故事、行为准则。",
        PromptFormat::Xml => "目标格式说明：\n使用 XML 标签格式，根标签为 <persona>。\n内部包含：<identity>, <personality>, <speech_style>, <relationship>, <emotional_expressions>, <background>, <guidelines>。",
        PromptFormat::Json => "目标格式说明：\n使用 JSON 格式，根对象包含 \"persona\" 键。\n内部包含：identity, personality, speech_style, relationship, emotional_expressions, background, guidelines。\n确保 JSON 格式有效。",
        PromptFormat::Yaml => "目标格式说明：\n使用 YAML 格式，根键为 persona。\n内部包含：identity, personality, speech_style, relationship, emotional_expressions, background, guidelines。\n注意正确的缩进（2空格）。",
    }
}

pub const GENERATE_WITH_SUPPLEMENTS: &str = r#"你是一位专业的 AI 人格设计师。请根据以下信息生成完整的人格设定。

用户描述：{description}

用户补充信息：{supplements}

需要 AI 自动生成的部分：{auto_fields}

输出格式要求：{format}

{format_hint}

要求：
1. 整合用户提供的所有信息
2. 为缺失部分创造合理的设定
3. 确保人格一致性和完整性
4. 使用指定的格式输出

请生成人格设定："#;

// ============================================================================
// Editing
// ============================================================================

pub const REFINE: &str = r#"你是一位专业的 AI 人格设计师。请根据反馈优化以下人格设定。

【重要】优化时必须：
1. 保持原有格式（{format}格式）不变
2. 保留所有未被反馈涉及的原有特征
3. 只修改反馈明确指出需要调整的部分
4. 不要删除任何原有设定（除非反馈明确要求删除）

当前人格设定：
{current_prompt}

用户反馈：{feedback}

请输出优化后的人格设定（保持{format}格式）："#;

pub const SHRINK: &str = r#"你是一位专业的文本压缩专家。请压缩以下人格设定，同时保持其核心特征。

【重要】压缩时必须：
1. 保持原有格式（{format}格式）不变
2. 保留所有核心人格特征
3. 删除冗余描述，合并相似内容
4. 压缩强度：{intensity}
   - 轻度：保留大部分细节，只删除明显冗余
   - 中度：精简描述，保留关键特征
   - 极限：只保留最核心的设定

原始人格设定：
{original_prompt}

请输出压缩后的人格设定（保持{format}格式）："#;

pub const CONVERT: &str = r#"你是一位专业的格式转换专家。请将以下人格设定从当前格式转换为目标格式。

【重要】转换时必须：
1. 保留所有原有内容和特征，不能遗漏任何信息
2. 保持语义完全一致
3. 如果原格式缺少某些结构字段，保持为空或使用"未设定"
4. 不要添加原文没有的新内容
5. 不要修改任何人格特征

原始人格设定（{source_format}格式）：
{original_prompt}

目标格式：{target_format}

{format_hint}

请输出转换后的人格设定（仅输出转换结果，不要添加解释）："#;

// ============================================================================
// Structured (JSON) prompts
// ============================================================================

pub const MISSING_ANALYSIS: &str = r#"你是一位 AI 人格设计顾问。请分析用户的人格描述，判断哪些关键设定已经提供、哪些缺失。

关键设定：name(姓名)、age(年龄)、identity(身份)、appearance(外貌)、personality(性格)、speech_style(说话风格)、relationship(与用户的关系)、background(背景故事)

用户描述：{description}

规则：
1. 只列出对人格塑造影响最大的缺失项，最多 5 个
2. 描述已足够完整时 missing 为空数组
3. hint 用一句话提示用户可以补充什么

只输出 JSON，不要有其他内容：
{"provided": ["personality"], "missing": [{"field": "name", "label": "姓名", "hint": "角色叫什么名字"}]}"#;

pub const INTENT: &str = r#"你是一个指令意图识别器。请判断用户想对人格执行什么操作。

可选操作(action)：
- generate: 生成新人格，填写 description
- refine: 修改/优化人格，填写 feedback
- shrink: 压缩/精简人格，可填 intensity（轻度/中度/极限）
- list: 查看人格列表
- view: 查看人格详情，可填 persona_id
- activate: 切换/应用人格，填写 persona_id
- delete: 删除人格，填写 persona_id
- rollback: 回滚到上一个版本
- status: 查看当前状态
- apply: 确认保存待确认的人格
- cancel: 取消待确认的操作
- help: 查看帮助或无法判断

当前上下文：
- 当前人格: {current_persona_id}
- 可用人格: {persona_list}
- 是否有待确认人格: {has_pending}

用户输入：{query}

只输出 JSON，不要有其他内容：
{"action": "generate", "description": "", "feedback": "", "intensity": "", "persona_id": ""}"#;

pub const PROFILE_INIT: &str = r#"你是一个用户画像分析专家。请根据用户的聊天记录创建初始画像。

## 用户信息
- 用户ID: {user_id}
- 昵称: {nickname}

## 聊天记录
{messages}

## 任务
分析这些消息，创建一个初始用户画像。

## 输出格式（严格JSON）
{"profile_text": "综合性的用户画像描述（100-300字）", "traits": ["性格特征1"], "interests": ["兴趣爱好1"], "speaking_style": "说话风格描述", "emotional_tendency": "情感倾向描述"}

只输出JSON，不要有其他内容。"#;

pub const PROFILE_UPDATE: &str = r#"你是一个用户画像分析专家。请根据用户的聊天记录更新其画像。

## 当前画像
{current_profile}

## 新的聊天记录
{new_messages}

## 任务
1. 分析这些新消息，提取有价值的信息
2. 结合现有画像，生成更新后的画像
3. 保持画像简洁精炼，突出重点

## 输出格式（严格JSON）
{"profile_text": "综合性的用户画像描述（100-300字）", "traits": ["性格特征1"], "interests": ["兴趣爱好1"], "speaking_style": "说话风格描述", "emotional_tendency": "情感倾向描述"}

只输出JSON，不要有其他内容。"#;
