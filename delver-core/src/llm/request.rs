//! LLM request and response types.

/// Request to the LLM
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct LlmRequest {
    /// User prompt
    pub prompt: String,

    /// Optional system instruction
    pub system_instruction: Option<String>,

    /// Optional JSON schema for structured output
    ///
    /// When provided, the backend asks the model for a JSON object matching
    /// this schema. Use [`LlmClient::generate_json`](super::LlmClient::generate_json)
    /// to parse the result.
    ///
    /// # Example
    ///
    /// ```
    /// use delver_core::LlmRequest;
    /// use serde_json::json;
    ///
    /// let schema = json!({
    ///     "type": "object",
    ///     "properties": {
    ///         "queries": {"type": "array", "items": {"type": "string"}}
    ///     },
    ///     "required": ["queries"]
    /// });
    ///
    /// let request = LlmRequest::new("Plan searches for: rust async")
    ///     .with_response_format(schema);
    /// ```
    pub response_format: Option<serde_json::Value>,

    /// Per-request temperature override
    pub temperature: Option<f32>,

    /// Pipeline phase this call belongs to, e.g. "planning" or "synthesis"
    ///
    /// Used in log lines and by test doubles to route canned responses.
    pub label: String,
}

impl LlmRequest {
    /// Create a new LLM request with just a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            label: "default".to_string(),
            ..Default::default()
        }
    }

    /// Create a new LLM request with prompt and system instruction
    pub fn with_system(prompt: impl Into<String>, system: impl Into<String>) -> Self {
        Self::new(prompt).with_system_instruction(system)
    }

    /// Set the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    /// Set a JSON schema for structured output
    #[must_use]
    pub fn with_response_format(mut self, schema: serde_json::Value) -> Self {
        self.response_format = Some(schema);
        self
    }

    /// Override the configured temperature for this request.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Label the pipeline phase this call belongs to.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Buffered response from the LLM
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Generated text
    pub text: String,

    /// Total tokens reported by the backend, if any
    pub total_tokens: Option<u32>,
}

impl LlmResponse {
    /// Create a response with no usage metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            total_tokens: None,
        }
    }

    /// Attach a token count.
    #[must_use]
    pub fn with_total_tokens(mut self, tokens: u32) -> Self {
        self.total_tokens = Some(tokens);
        self
    }
}
