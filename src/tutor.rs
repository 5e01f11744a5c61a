//! Tutoring domain model: target languages, proficiency levels, practice
//! scenarios, and the system instruction sent to the conversational service.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default conversational model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice for synthesized replies
pub const DEFAULT_VOICE: &str = "Kore";

/// Target language the user wants to practice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Japanese,
    Mandarin,
    Italian,
    Portuguese,
    Korean,
    Urdu,
}

impl Language {
    /// Display name used in prompts and transcripts
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Japanese => "Japanese",
            Language::Mandarin => "Mandarin Chinese",
            Language::Italian => "Italian",
            Language::Portuguese => "Portuguese",
            Language::Korean => "Korean",
            Language::Urdu => "Urdu",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Spanish
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-reported proficiency level, used to calibrate the tutor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Proficiency {
    Beginner,
    Intermediate,
    Advanced,
}

impl Proficiency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proficiency::Beginner => "Beginner",
            Proficiency::Intermediate => "Intermediate",
            Proficiency::Advanced => "Advanced",
        }
    }
}

impl Default for Proficiency {
    fn default() -> Self {
        Proficiency::Beginner
    }
}

impl fmt::Display for Proficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A practice scenario the conversation is framed around
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    /// Stable identifier (used on the CLI)
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// One-line framing shown to the user and fed into the prompt
    pub description: &'static str,
}

/// The built-in scenario catalog
pub const SCENARIOS: [Scenario; 6] = [
    Scenario {
        id: "casual_chat",
        name: "Casual Conversation",
        description: "A relaxed chat about hobbies, weather, and daily life.",
    },
    Scenario {
        id: "coffee_shop",
        name: "At the Cafe",
        description: "Order your favorite drink and pastry in a bustling cafe.",
    },
    Scenario {
        id: "job_interview",
        name: "Job Interview",
        description: "Practice professional vocabulary and answer challenging questions.",
    },
    Scenario {
        id: "travel_airport",
        name: "Airport Check-in",
        description: "Navigate through check-in, security, and boarding.",
    },
    Scenario {
        id: "doctor_visit",
        name: "Medical Appointment",
        description: "Describe symptoms and understand medical advice.",
    },
    Scenario {
        id: "apartment_renting",
        name: "Renting an Apartment",
        description: "Inquire about features, price, and lease terms.",
    },
];

/// Look up a scenario by its identifier
pub fn find_scenario(id: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.id == id)
}

/// Build the tutor system instruction for a session
pub fn system_instruction(
    language: Language,
    proficiency: Proficiency,
    scenario: &Scenario,
) -> String {
    format!(
        "You are a highly skilled and patient language tutor and conversational partner.\n\
         Your goal is to help the user practice their {language} skills.\n\
         The user's current level is {proficiency}.\n\
         The current scenario is: {name} - {description}.\n\
         \n\
         Guidelines:\n\
         1. Speak naturally in {language} for the chosen scenario.\n\
         2. Adjust your complexity and speed to match the user's {proficiency} level.\n\
         3. If the user makes a significant mistake, gently correct them while keeping the conversation flowing.\n\
         4. Encourage the user to speak more by asking open-ended questions related to the scenario.\n\
         5. Stay in character for the scenario (e.g., if it's a coffee shop, you are the barista or a fellow customer).\n\
         6. Always respond in the target language ({language}).",
        language = language,
        proficiency = proficiency,
        name = scenario.name,
        description = scenario.description,
    )
}
