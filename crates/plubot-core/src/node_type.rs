use serde::{Deserialize, Serialize};
use std::fmt;

/// Node tags understood by the flow editor.
///
/// Persisted flows store the tag as a plain string. Tags this build does not
/// know about are carried verbatim in [`NodeType::Custom`] so a load/save
/// cycle never rewrites them. An empty tag reads as [`NodeType::Default`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    #[default]
    Default,
    Start,
    End,
    Message,
    Decision,
    Action,
    Option,
    Input,
    Condition,
    ApiNode,
    WaitNode,
    MediaNode,
    MemoryNode,
    HttpRequestNode,
    WebhookNode,
    DatabaseNode,
    AiNode,
    AiNodePro,
    NlpNode,
    ComplexConditionNode,
    PowerNode,
    UltraOptimizedNode,
    AdvancedAi,
    /// A tag registered by a plugin or a newer editor.
    Custom(String),
}

impl NodeType {
    pub const ALL: [NodeType; 23] = [
        NodeType::Default,
        NodeType::Start,
        NodeType::End,
        NodeType::Message,
        NodeType::Decision,
        NodeType::Action,
        NodeType::Option,
        NodeType::Input,
        NodeType::Condition,
        NodeType::ApiNode,
        NodeType::WaitNode,
        NodeType::MediaNode,
        NodeType::MemoryNode,
        NodeType::HttpRequestNode,
        NodeType::WebhookNode,
        NodeType::DatabaseNode,
        NodeType::AiNode,
        NodeType::AiNodePro,
        NodeType::NlpNode,
        NodeType::ComplexConditionNode,
        NodeType::PowerNode,
        NodeType::UltraOptimizedNode,
        NodeType::AdvancedAi,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Default => "default",
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Message => "message",
            NodeType::Decision => "decision",
            NodeType::Action => "action",
            NodeType::Option => "option",
            NodeType::Input => "input",
            NodeType::Condition => "condition",
            NodeType::ApiNode => "apinode",
            NodeType::WaitNode => "waitnode",
            NodeType::MediaNode => "medianode",
            NodeType::MemoryNode => "memorynode",
            NodeType::HttpRequestNode => "httpRequestNode",
            NodeType::WebhookNode => "webhookNode",
            NodeType::DatabaseNode => "databaseNode",
            NodeType::AiNode => "aiNode",
            NodeType::AiNodePro => "aiNodePro",
            NodeType::NlpNode => "nlpNode",
            NodeType::ComplexConditionNode => "complexConditionNode",
            NodeType::PowerNode => "powerNode",
            NodeType::UltraOptimizedNode => "ultraOptimizedNode",
            NodeType::AdvancedAi => "ai",
            NodeType::Custom(tag) => tag,
        }
    }

    /// Lenient lookup; unknown tags are kept as `Custom`.
    pub fn parse(tag: &str) -> Self {
        if tag.is_empty() {
            return NodeType::Default;
        }
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == tag)
            .cloned()
            .unwrap_or_else(|| NodeType::Custom(tag.to_string()))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, NodeType::Custom(_))
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            NodeType::Default => "Node",
            NodeType::Start => "Start",
            NodeType::End => "End",
            NodeType::Message => "Message",
            NodeType::Decision => "Decision",
            NodeType::Action => "Action",
            NodeType::Option => "Option",
            NodeType::Input => "User input",
            NodeType::Condition => "Condition",
            NodeType::ApiNode => "API call",
            NodeType::WaitNode => "Wait",
            NodeType::MediaNode => "Media",
            NodeType::MemoryNode => "Memory",
            NodeType::HttpRequestNode => "HTTP request",
            NodeType::WebhookNode => "Webhook",
            NodeType::DatabaseNode => "Database",
            NodeType::AiNode | NodeType::AdvancedAi => "AI",
            NodeType::AiNodePro => "AI Pro",
            NodeType::NlpNode => "NLP",
            NodeType::ComplexConditionNode => "Complex condition",
            NodeType::PowerNode => "Power",
            NodeType::UltraOptimizedNode | NodeType::Custom(_) => "Node",
        }
    }

    /// Decision and option nodes are always wired with elite edges.
    pub fn requires_elite_edge(&self) -> bool {
        matches!(self, NodeType::Decision | NodeType::Option)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        match value {
            NodeType::Custom(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// Edge tags. Unknown tags survive as [`EdgeType::Custom`], like node tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeType {
    #[default]
    Default,
    Success,
    Warning,
    Danger,
    UltraOptimized,
    Elite,
    Custom(String),
}

impl EdgeType {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeType::Default => "default",
            EdgeType::Success => "success",
            EdgeType::Warning => "warning",
            EdgeType::Danger => "danger",
            EdgeType::UltraOptimized => "ultraOptimizedEdge",
            EdgeType::Elite => "eliteEdge",
            EdgeType::Custom(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "success" => EdgeType::Success,
            "warning" => EdgeType::Warning,
            "danger" => EdgeType::Danger,
            "ultraOptimizedEdge" => EdgeType::UltraOptimized,
            "eliteEdge" => EdgeType::Elite,
            "" | "default" => EdgeType::Default,
            other => EdgeType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EdgeType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EdgeType> for String {
    fn from(value: EdgeType) -> Self {
        match value {
            EdgeType::Custom(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_parse() {
        for kind in NodeType::ALL {
            assert_eq!(NodeType::parse(kind.as_str()), kind);
        }
        assert!(NodeType::ALL.iter().all(|kind| !kind.is_custom()));
    }

    #[test]
    fn unknown_tags_are_kept_verbatim() {
        let kind: NodeType = serde_json::from_str("\"emailNode\"").unwrap();
        assert_eq!(kind, NodeType::Custom("emailNode".to_string()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"emailNode\"");
        assert_eq!(kind.default_label(), "Node");

        let edge: EdgeType = serde_json::from_str("\"customEdge\"").unwrap();
        assert_eq!(edge, EdgeType::Custom("customEdge".to_string()));
        assert_eq!(serde_json::to_string(&edge).unwrap(), "\"customEdge\"");
    }

    #[test]
    fn empty_tags_read_as_default() {
        assert_eq!(NodeType::parse(""), NodeType::Default);
        assert_eq!(EdgeType::parse(""), EdgeType::Default);
    }

    #[test]
    fn serializes_as_original_tag() {
        assert_eq!(
            serde_json::to_string(&NodeType::HttpRequestNode).unwrap(),
            "\"httpRequestNode\""
        );
        assert_eq!(serde_json::to_string(&EdgeType::Elite).unwrap(), "\"eliteEdge\"");
    }
}
