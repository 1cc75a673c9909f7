use rand::seq::SliceRandom;

const TIPS: &[&str] = &[
    "Try the two-minute rule: if a task takes less than two minutes, do it right now.",
    "Put your phone in another room before the next block.",
    "Write down the one thing you want done by the end of this session.",
    "Close every tab that is not part of the task in front of you.",
    "When your mind wanders, note the thought on paper and come back.",
    "Take a real break between blocks: stand up, drink water, look away from the screen.",
];

const REPLIES: &[(&[&str], &str)] = &[
    (
        &["hello", "hi", "hey"],
        "Hi! Ready to get some focused work done?",
    ),
    (
        &["how are you"],
        "I'm a program, but I'm ready to help you focus!",
    ),
    (
        &["what is this", "what is mindanchor", "about"],
        "MindAnchor is a focus timer that notices when your attention drifts and helps you get back on track.",
    ),
    (
        &["thanks", "thank you"],
        "You're welcome! Keep up the good work.",
    ),
];

/// Canned replies used whenever no language model is reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptedResponder;

impl ScriptedResponder {
    pub fn respond(&self, prompt: &str, stats_context: &str) -> String {
        let lower = prompt.to_lowercase();
        if lower.contains("stats") || lower.contains("how am i doing") {
            return stats_context.to_string();
        }

        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        let matches = |keyword: &str| {
            if keyword.contains(' ') {
                lower.contains(keyword)
            } else {
                words.contains(&keyword)
            }
        };

        for (keywords, reply) in REPLIES {
            if keywords.iter().any(|keyword| matches(keyword)) {
                return (*reply).to_string();
            }
        }

        self.tip()
    }

    pub fn tip(&self) -> String {
        TIPS.choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Stay with it. One block at a time.")
            .to_string()
    }
}
