//! Post-pass response transform: internal-token scrubbing and disclaimer
//! injection.
//!
//! Disclaimers are hardcoded here rather than prompted: the code is the
//! single source of truth, so the model can neither reword nor omit them.

use std::collections::HashSet;

use regex::Regex;

use crate::{GuardError, GuardResult};

/// Fixed replacement shown after the output retry budget is exhausted.
pub const SAFE_RESPONSE: &str = "죄송합니다. 응답을 생성하는 과정에서 문제가 발견되었습니다. \
                                 다시 질문해 주시면 정확한 정보로 답변드리겠습니다.";

/// Marker prefixed to every injected disclaimer line.
const DISCLAIMER_MARKER: &str = "\n※ ";

/// Internal product codes: a `B` followed by five or more digits, with
/// optional surrounding parentheses.
const PRODUCT_CODE_PATTERN: &str = r"\(?\s*B\d{5,}\s*\)?";

/// Maps a set of trigger tools to the disclaimer their answers require.
#[derive(Clone, Debug)]
pub struct DisclaimerRule {
    triggers: HashSet<String>,
    text: String,
}

impl DisclaimerRule {
    /// Creates a rule firing when any trigger tool was used in the turn.
    #[must_use]
    pub fn new<I, S>(triggers: I, text: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
            text: text.into(),
        }
    }

    /// Returns the disclaimer text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    fn fires_for(&self, tools_used: &[String]) -> bool {
        tools_used.iter().any(|tool| self.triggers.contains(tool))
    }
}

fn default_rules() -> Vec<DisclaimerRule> {
    vec![
        DisclaimerRule::new(
            [
                "premium_estimate",
                "premium_compare",
                "plan_options",
                "renewal_premium_projection",
                "affordability_check",
            ],
            "이 금액은 예시이며, 실제 보험료는 상품·보장내용·건강상태에 따라 달라집니다. \
             정확한 보험료는 설계사 상담 또는 공식 홈페이지를 통해 확인해 주세요.",
        ),
        DisclaimerRule::new(
            ["product_compare", "product_search", "product_get"],
            "상품 상세 내용은 약관을 기준으로 하며, \
             가입 전 반드시 상품설명서와 약관을 확인하시기 바랍니다.",
        ),
        DisclaimerRule::new(
            [
                "coverage_summary",
                "coverage_detail",
                "benefit_amount_lookup",
                "benefit_limit_rules",
                "event_eligibility_check",
            ],
            "보장 내용은 약관을 기준으로 하며, 여기 표시된 내용은 참고용입니다. \
             실제 보장 범위와 지급 조건은 약관에서 정한 바에 따릅니다.",
        ),
    ]
}

/// Result of the post-pass transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedResponse {
    /// The cleaned, possibly disclaimed response text.
    pub text: String,
    /// Whether any internal token was scrubbed out.
    pub internal_tokens_removed: bool,
    /// Whether a disclaimer was appended by this pass.
    pub disclaimer_appended: bool,
}

/// Applies the post-pass transform to a guardrail-passed response.
///
/// Rules are evaluated in order and at most one disclaimer is appended per
/// response; running the transform again on an already-disclaimed response
/// is a no-op.
pub struct ResponsePolicy {
    rules: Vec<DisclaimerRule>,
    product_code: Regex,
}

impl ResponsePolicy {
    /// Creates the policy with the built-in disclaimer rules.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidPattern`] if the product-code pattern
    /// fails to compile.
    pub fn new() -> GuardResult<Self> {
        Self::with_rules(default_rules())
    }

    /// Creates the policy with custom disclaimer rules.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidPattern`] if the product-code pattern
    /// fails to compile.
    pub fn with_rules(rules: Vec<DisclaimerRule>) -> GuardResult<Self> {
        let product_code = Regex::new(PRODUCT_CODE_PATTERN)
            .map_err(|err| GuardError::pattern(PRODUCT_CODE_PATTERN, err))?;
        Ok(Self {
            rules,
            product_code,
        })
    }

    /// Strips internal tool names and product codes from visible text.
    ///
    /// The tool-name alternation is built from the live registry's names, so
    /// hot-registered tools are scrubbed without a pattern update. Doubled
    /// spaces left by removals are collapsed.
    #[must_use]
    pub fn scrub(&self, text: &str, tool_names: &[String]) -> String {
        let mut cleaned = text.to_owned();
        if !tool_names.is_empty() {
            let alternation = tool_names
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|");
            if let Ok(names) = Regex::new(&format!(r"\b({alternation})\b")) {
                cleaned = names.replace_all(&cleaned, "").into_owned();
            }
        }
        cleaned = self.product_code.replace_all(&cleaned, "").into_owned();

        let mut collapsed = String::with_capacity(cleaned.len());
        let mut last_was_space = false;
        for c in cleaned.chars() {
            if c == ' ' {
                if !last_was_space {
                    collapsed.push(c);
                }
                last_was_space = true;
            } else {
                collapsed.push(c);
                last_was_space = false;
            }
        }
        collapsed.trim().to_owned()
    }

    /// Selects the disclaimer for the tools used this turn, if any rule
    /// fires.
    #[must_use]
    pub fn select_disclaimer(&self, tools_used: &[String]) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.fires_for(tools_used))
            .map(DisclaimerRule::text)
    }

    /// Runs the full post-pass transform: scrub, then append at most one
    /// disclaimer when the text is not already disclaimed.
    #[must_use]
    pub fn finalize(
        &self,
        text: &str,
        tool_names: &[String],
        tools_used: &[String],
    ) -> FinalizedResponse {
        let cleaned = self.scrub(text, tool_names);
        let internal_tokens_removed = cleaned != text;

        let already_disclaimed = cleaned.contains(DISCLAIMER_MARKER);
        if let Some(disclaimer) = self.select_disclaimer(tools_used)
            && !already_disclaimed
            && !cleaned.contains(disclaimer)
        {
            return FinalizedResponse {
                text: format!("{}\n{DISCLAIMER_MARKER}{disclaimer}", cleaned.trim_end()),
                internal_tokens_removed,
                disclaimer_appended: true,
            };
        }

        FinalizedResponse {
            text: cleaned,
            internal_tokens_removed,
            disclaimer_appended: false,
        }
    }
}
