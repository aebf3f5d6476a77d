//! Personality prompts and the canned-reply table.

pub const DEFAULT_VOICE: &str = "friendly";

const FRIENDLY: &str = "You are Bzik, a friendly AI assistant for the Bzik Fly website. \
You help visitors learn about our AI platform, answer questions about features, pricing, \
and guide them through the site.\n\n\
You speak clearly and naturally like a human, never robotic. Be helpful, engaging, and \
knowledgeable about:\n\
- Bzik's AI capabilities and features\n\
- Business applications and use cases\n\
- Pricing and plans\n\
- How to get started\n\
- Technical integration\n\n\
Keep responses:\n\
- Clear, contextual, and friendly\n\
- Concise but informative (1-3 sentences)\n\
- Actionable when possible\n\
- Professional yet approachable\n\n\
If users ask about navigation or sections, guide them helpfully. Show enthusiasm for \
Bzik's technology while being genuine and helpful.";

const PROFESSIONAL: &str = "You are Bzik AI, a professional and efficient chatbot. \
You are helpful, clear, and business-focused. Maintain a professional tone in all responses, \
providing accurate and concise information. Be respectful and demonstrate expertise in \
business matters while keeping responses focused and actionable.";

const PLAYFUL: &str = "You are Bzik AI, an energetic, fun, and creative chatbot. \
You're helpful while being playful and engaging, often using emojis and light-hearted \
language. Make conversations enjoyable with humor and enthusiasm, but always provide useful \
information. Keep responses moderate length and entertaining.";

// Keys are already normalized
const CANNED: &[(&str, &str)] = &[
    (
        "how to make tea",
        "To make tea, start with fresh water, boil it to about 100°C. Add your favorite tea \
bag or leaves, let it steep for 3-5 minutes. Add sugar or milk if you like, and enjoy!",
    ),
    (
        "what is your name",
        "I'm Bzik AI, your friendly chatbot assistant!",
    ),
    (
        "tell me a joke",
        "Why don't scientists trust atoms? Because they make up everything!",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Friendly,
    Professional,
    Playful,
}

impl Voice {
    /// Unrecognized names get the default personality.
    pub fn from_name(name: &str) -> Self {
        match name {
            "professional" => Self::Professional,
            "playful" => Self::Playful,
            _ => Self::Friendly,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Friendly => FRIENDLY,
            Self::Professional => PROFESSIONAL,
            Self::Playful => PLAYFUL,
        }
    }
}

/// Lowercases and keeps only ASCII letters, digits and whitespace.
pub fn normalize(message: &str) -> String {
    message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn canned_reply(message: &str) -> Option<&'static str> {
    let key = normalize(message);
    CANNED
        .iter()
        .find(|(question, _)| *question == key)
        .map(|(_, answer)| *answer)
}
