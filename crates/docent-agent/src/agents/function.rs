use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, NaiveDate, Utc};
use docent_ai::{GenerateRequest, ModelTask, SharedGenerator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::calc::{self, CalcError};
use super::{AgentContext, AgentKind, AgentReply, INVALID_INPUT_MESSAGE, StepAgent};
use crate::config::GenerationProfile;
use crate::error::{Error, Result};

const NAME: &str = "FunctionAgent";

static DATE_ADD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{4}-\d{2}-\d{2}|today)\s*([+-])\s*(\d+)\s*days?").expect("valid regex")
});
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"));
static DAYS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*days?").expect("valid regex"));
static QUOTED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'“]([^"'”]+)["'”]"#).expect("valid regex"));
static ARITHMETIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s+\-*/%^().,×÷]+$").expect("valid regex"));

/// The registered pure functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionName {
    Calculate,
    Uppercase,
    Lowercase,
    Reverse,
    WordCount,
    Uuid,
    Base64Encode,
    Base64Decode,
    UrlEncode,
    UrlDecode,
    DateAdd,
    CurrentTime,
}

impl FunctionName {
    pub const ALL: [FunctionName; 12] = [
        FunctionName::Calculate,
        FunctionName::Uppercase,
        FunctionName::Lowercase,
        FunctionName::Reverse,
        FunctionName::WordCount,
        FunctionName::Uuid,
        FunctionName::Base64Encode,
        FunctionName::Base64Decode,
        FunctionName::UrlEncode,
        FunctionName::UrlDecode,
        FunctionName::DateAdd,
        FunctionName::CurrentTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::Calculate => "calculate",
            FunctionName::Uppercase => "uppercase",
            FunctionName::Lowercase => "lowercase",
            FunctionName::Reverse => "reverse",
            FunctionName::WordCount => "word_count",
            FunctionName::Uuid => "uuid",
            FunctionName::Base64Encode => "base64_encode",
            FunctionName::Base64Decode => "base64_decode",
            FunctionName::UrlEncode => "url_encode",
            FunctionName::UrlDecode => "url_decode",
            FunctionName::DateAdd => "date_add",
            FunctionName::CurrentTime => "current_time",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FunctionName::Calculate => "evaluate an arithmetic expression",
            FunctionName::Uppercase => "convert text to upper case",
            FunctionName::Lowercase => "convert text to lower case",
            FunctionName::Reverse => "reverse the characters of a text",
            FunctionName::WordCount => "count the words in a text",
            FunctionName::Uuid => "generate a random UUID",
            FunctionName::Base64Encode => "encode text as base64",
            FunctionName::Base64Decode => "decode base64 to text",
            FunctionName::UrlEncode => "percent-encode text for a URL",
            FunctionName::UrlDecode => "decode percent-encoded text",
            FunctionName::DateAdd => "add or subtract days from a date",
            FunctionName::CurrentTime => "report the current UTC time",
        }
    }

    pub fn example(&self) -> &'static str {
        match self {
            FunctionName::Calculate => "Calculate 15 * 23 + 7",
            FunctionName::Uppercase => "Convert \"hello world\" to uppercase",
            FunctionName::Lowercase => "Convert \"HELLO\" to lowercase",
            FunctionName::Reverse => "Reverse \"stressed\"",
            FunctionName::WordCount => "Word count of \"the quick brown fox\"",
            FunctionName::Uuid => "Generate a UUID",
            FunctionName::Base64Encode => "Base64 encode \"hello\"",
            FunctionName::Base64Decode => "Base64 decode \"aGVsbG8=\"",
            FunctionName::UrlEncode => "URL encode \"a b&c\"",
            FunctionName::UrlDecode => "URL decode \"a%20b\"",
            FunctionName::DateAdd => "Add 30 days to 2024-01-15",
            FunctionName::CurrentTime => "What is the current time?",
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        FunctionName::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

/// A function selection extracted from an instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default)]
    pub argument: String,
}

impl FunctionCall {
    fn new(function: FunctionName, argument: impl Into<String>) -> Self {
        Self {
            function: function.as_str().to_string(),
            argument: argument.into(),
        }
    }
}

/// Runs small utility functions selected from natural-language instructions
pub struct FunctionAgent {
    generator: Option<SharedGenerator>,
    profile: GenerationProfile,
}

impl Default for FunctionAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionAgent {
    /// Agent using only keyword extraction
    pub fn new() -> Self {
        Self {
            generator: None,
            profile: GenerationProfile::new(0.1, 512),
        }
    }

    /// Use a model call to extract the function call
    pub fn with_generator(mut self, generator: SharedGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_profile(mut self, profile: GenerationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Names of every registered function
    pub fn available_functions(&self) -> Vec<&'static str> {
        FunctionName::ALL.iter().map(|f| f.as_str()).collect()
    }

    async fn extract_call(&self, instruction: &str) -> Option<FunctionCall> {
        if let Some(generator) = &self.generator {
            let request = GenerateRequest::new(extraction_prompt(instruction))
                .temperature(0.1)
                .max_tokens(self.profile.max_tokens)
                .task(ModelTask::Fast);
            match generator.generate(&request).await {
                Ok(raw) => match parse_call(&raw) {
                    Some(call) => return Some(call),
                    None => tracing::debug!("function extraction output did not parse: {}", raw),
                },
                Err(e) => tracing::warn!("function extraction call failed: {}", e),
            }
        }
        keyword_call(instruction)
    }

    fn help_reply(&self) -> AgentReply {
        let mut lines = vec!["Available functions:".to_string()];
        for f in FunctionName::ALL {
            lines.push(format!("- {}: {} (e.g. {})", f, f.description(), f.example()));
        }
        AgentReply::success(NAME, lines.join("\n")).with_data(json!({ "help": true }))
    }
}

fn extraction_prompt(instruction: &str) -> String {
    let catalogue = FunctionName::ALL
        .iter()
        .map(|f| format!("- {}: {}", f, f.description()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Pick the function that fulfils the request and the text it should run on.\n\n\
         Functions:\n{catalogue}\n\n\
         For date_add write the argument as \"YYYY-MM-DD + N days\" (or \"today - N days\").\n\
         Reply with only a JSON object: {{\"function\": \"<name>\", \"argument\": \"<text>\"}}. \
         Use \"none\" as the function if nothing applies.\n\n\
         Request: {instruction}"
    )
}

/// Parse the first JSON object in a model reply
fn parse_call(raw: &str) -> Option<FunctionCall> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn quoted(instruction: &str) -> Option<String> {
    QUOTED_PATTERN
        .captures(instruction)
        .map(|c| c[1].to_string())
}

/// Text following `keyword`, minus connective words.
///
/// Keywords are ASCII, so ASCII lowercasing keeps byte offsets aligned
/// with `instruction`.
fn after_keyword(instruction: &str, keyword: &str) -> String {
    let lower = instruction.to_ascii_lowercase();
    let rest = lower
        .find(keyword)
        .and_then(|pos| instruction.get(pos + keyword.len()..));
    let Some(rest) = rest else {
        return instruction.trim().to_string();
    };
    let mut rest = rest.trim_start_matches([':', ' ']);
    for filler in ["of ", "for ", "the ", "this "] {
        if rest.get(..filler.len()).is_some_and(|p| p.eq_ignore_ascii_case(filler)) {
            rest = &rest[filler.len()..];
        }
    }
    rest.trim().to_string()
}

fn date_add_argument(instruction: &str) -> String {
    if let Some(m) = DATE_ADD_PATTERN.find(instruction) {
        return m.as_str().to_string();
    }
    let lower = instruction.to_lowercase();
    let date = DATE_PATTERN
        .find(instruction)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "today".to_string());
    let days = DAYS_PATTERN
        .captures(instruction)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "0".to_string());
    let negative = ["subtract", "minus", "before", "ago"]
        .iter()
        .any(|w| lower.contains(w));
    format!("{date} {} {days} days", if negative { '-' } else { '+' })
}

/// Deterministic keyword extraction
fn keyword_call(instruction: &str) -> Option<FunctionCall> {
    let lower = instruction.to_lowercase();
    let has = |w: &str| lower.contains(w);
    let text_arg = |keyword: &str| quoted(instruction).unwrap_or_else(|| after_keyword(instruction, keyword));

    let call = if has("base64") {
        let name = if has("decode") {
            FunctionName::Base64Decode
        } else {
            FunctionName::Base64Encode
        };
        let keyword = if has("decode") { "decode" } else if has("encode") { "encode" } else { "base64" };
        FunctionCall::new(name, text_arg(keyword))
    } else if has("url") && (has("encode") || has("decode")) {
        let (name, keyword) = if has("decode") {
            (FunctionName::UrlDecode, "decode")
        } else {
            (FunctionName::UrlEncode, "encode")
        };
        FunctionCall::new(name, text_arg(keyword))
    } else if has("uuid") || has("guid") {
        FunctionCall::new(FunctionName::Uuid, "")
    } else if has("word count") || has("count words") || has("count the words") || has("word_count") {
        FunctionCall::new(FunctionName::WordCount, text_arg("of"))
    } else if has("uppercase") || has("upper case") {
        FunctionCall::new(FunctionName::Uppercase, text_arg("uppercase"))
    } else if has("lowercase") || has("lower case") {
        FunctionCall::new(FunctionName::Lowercase, text_arg("lowercase"))
    } else if has("reverse") {
        FunctionCall::new(FunctionName::Reverse, text_arg("reverse"))
    } else if has("day") && (DATE_PATTERN.is_match(instruction) || has("today")) {
        FunctionCall::new(FunctionName::DateAdd, date_add_argument(instruction))
    } else if has("current time") || has("what time") || has("time now") || has("current date") {
        FunctionCall::new(FunctionName::CurrentTime, "")
    } else if let Some(keyword) = ["calculate", "compute", "evaluate"].into_iter().find(|k| has(k)) {
        FunctionCall::new(FunctionName::Calculate, after_keyword(instruction, keyword))
    } else if ARITHMETIC_PATTERN.is_match(instruction.trim()) && instruction.chars().any(|c| c.is_ascii_digit()) {
        FunctionCall::new(FunctionName::Calculate, instruction.trim())
    } else {
        return None;
    };
    Some(call)
}

fn parse_date_add(argument: &str) -> Result<NaiveDate> {
    let caps = DATE_ADD_PATTERN.captures(argument).ok_or_else(|| {
        Error::InvalidInput(format!(
            "expected \"YYYY-MM-DD + N days\" or \"today - N days\", got '{argument}'"
        ))
    })?;
    let base = if caps[1].eq_ignore_ascii_case("today") {
        Utc::now().date_naive()
    } else {
        NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d")
            .map_err(|e| Error::InvalidInput(format!("invalid date '{}': {e}", &caps[1])))?
    };
    let days: i64 = caps[3]
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid day count '{}'", &caps[3])))?;
    let delta = if &caps[2] == "-" { -days } else { days };
    Duration::try_days(delta)
        .and_then(|d| base.checked_add_signed(d))
        .ok_or_else(|| Error::InvalidInput("date out of range".to_string()))
}

/// Run one registered function
pub fn execute(function: FunctionName, argument: &str) -> Result<String> {
    let needs_text = || {
        if argument.is_empty() {
            Err(Error::InvalidInput(format!("{function} needs some text to work on")))
        } else {
            Ok(argument)
        }
    };
    let output = match function {
        FunctionName::Calculate => {
            let value = calc::evaluate(argument).map_err(|e: CalcError| {
                Error::InvalidInput(format!("invalid calculation: {e}"))
            })?;
            format!("Result: {}", calc::format_number(value))
        }
        FunctionName::Uppercase => needs_text()?.to_uppercase(),
        FunctionName::Lowercase => needs_text()?.to_lowercase(),
        FunctionName::Reverse => needs_text()?.chars().rev().collect(),
        FunctionName::WordCount => format!("Word count: {}", argument.split_whitespace().count()),
        FunctionName::Uuid => uuid::Uuid::new_v4().to_string(),
        FunctionName::Base64Encode => BASE64.encode(needs_text()?),
        FunctionName::Base64Decode => {
            let bytes = BASE64
                .decode(needs_text()?.trim())
                .map_err(|e| Error::InvalidInput(format!("invalid base64: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|_| Error::InvalidInput("decoded bytes are not UTF-8 text".to_string()))?
        }
        FunctionName::UrlEncode => urlencoding::encode(needs_text()?).into_owned(),
        FunctionName::UrlDecode => urlencoding::decode(needs_text()?)
            .map_err(|_| Error::InvalidInput("decoded bytes are not UTF-8 text".to_string()))?
            .into_owned(),
        FunctionName::DateAdd => parse_date_add(argument)?.format("%Y-%m-%d").to_string(),
        FunctionName::CurrentTime => {
            format!("Current time: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
        }
    };
    Ok(output)
}

#[async_trait]
impl StepAgent for FunctionAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Function
    }

    async fn handle_message(&self, instruction: &str, context: &AgentContext) -> AgentReply {
        if instruction.trim().is_empty() {
            return AgentReply::failure(NAME, INVALID_INPUT_MESSAGE);
        }

        let Some(mut call) = self.extract_call(instruction).await else {
            return self.help_reply();
        };
        let Ok(function) = call.function.parse::<FunctionName>() else {
            tracing::debug!(function = %call.function, "unknown function requested");
            return self.help_reply();
        };
        if call.argument.trim().is_empty() {
            if let Some((_, previous)) = context.dependency_results.first() {
                call.argument = previous.clone();
            }
        }

        tracing::debug!(%function, argument = %call.argument, "executing function");
        match execute(function, call.argument.trim()) {
            Ok(output) => AgentReply::success(NAME, output).with_data(json!({
                "function": function,
                "argument": call.argument,
            })),
            Err(e) => AgentReply::failure(NAME, format!("{function} failed: {e}")),
        }
    }
}
