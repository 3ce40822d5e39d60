//! System prompts for the reasoning service.
//!
//! One base prompt, rendered with the current operator table, plus three
//! profiles that tune it:
//!
//! | profile | temperature | max tokens | addendum |
//! |---|---|---|---|
//! | `default` | 0.1 | 150 | – |
//! | `detailed` | 0.2 | 300 | ask for reasoning on tool choice |
//! | `conservative` | 0.05 | 100 | prefer the most common tool |

use scrub_kernel::OperatorProfiles;
use serde::{Deserialize, Serialize};

const BASE_PROMPT: &str = "\
You are a surgical assistant robot.
Extract tool, action, and handedness from the given instruction.

Rules:
- If incision is mentioned and no tool specified → scalpel
- If stitch is mentioned and no tool specified → scissors
- Use handedness from the operator profiles below
- Output must be valid JSON with exactly these fields: tool, action, handedness

Output JSON format: {\"tool\": \"...\", \"action\": \"...\", \"handedness\": \"...\"}

Example inputs and outputs:
- \"hi sarath, you can start the incision\" → {\"tool\": \"scalpel\", \"action\": \"incision\", \"handedness\": \"right\"}
- \"kiran, please stitch the wound\" → {\"tool\": \"scissors\", \"action\": \"stitch\", \"handedness\": \"left\"}
- \"sarath, use the forceps to grasp the tissue\" → {\"tool\": \"forceps\", \"action\": \"grasp\", \"handedness\": \"right\"}
- \"kiran, make an incision with the scalpel\" → {\"tool\": \"scalpel\", \"action\": \"incision\", \"handedness\": \"left\"}

Important:
- Words that sound like stitching (switching, switch, start city) mean stitch
- Words that sound like incision (in session, insition) mean incision
- Extract the specific tool mentioned or infer it from the action
- Use the correct handedness based on the operator profile
- Return only valid JSON, no additional text or explanations";

/// Prompt tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptProfile {
    #[default]
    Default,
    Detailed,
    Conservative,
}

impl PromptProfile {
    pub const ALL: [PromptProfile; 3] = [
        PromptProfile::Default,
        PromptProfile::Detailed,
        PromptProfile::Conservative,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Some(PromptProfile::Default),
            "detailed" => Some(PromptProfile::Detailed),
            "conservative" => Some(PromptProfile::Conservative),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromptProfile::Default => "default",
            PromptProfile::Detailed => "detailed",
            PromptProfile::Conservative => "conservative",
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            PromptProfile::Default => 0.1,
            PromptProfile::Detailed => 0.2,
            PromptProfile::Conservative => 0.05,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            PromptProfile::Default => 150,
            PromptProfile::Detailed => 300,
            PromptProfile::Conservative => 100,
        }
    }

    fn addendum(self) -> Option<&'static str> {
        match self {
            PromptProfile::Default => None,
            PromptProfile::Detailed => {
                Some("Provide detailed reasoning for tool and action selection.")
            }
            PromptProfile::Conservative => Some(
                "Be conservative in tool selection. If uncertain, choose the most common tool for the action.",
            ),
        }
    }

    /// Full system prompt with the operator table appended.
    pub fn system_prompt(self, operators: &OperatorProfiles) -> String {
        let mut prompt = BASE_PROMPT.to_string();
        if let Some(extra) = self.addendum() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
        prompt.push_str("\n\nOperator profiles:");
        for op in operators.iter() {
            prompt.push_str(&format!("\n- {}: {}", op.name, op.handedness));
        }
        prompt
    }
}

impl std::fmt::Display for PromptProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
