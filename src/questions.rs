use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QuestionCategory {
    #[serde(rename = "Part 1")]
    Part1,
    #[serde(rename = "Part 2")]
    Part2,
    #[serde(rename = "Part 3")]
    Part3,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub category: QuestionCategory,
    pub topic: String,
    pub text: String,
}

struct CatalogEntry {
    id: &'static str,
    category: QuestionCategory,
    topic: &'static str,
    text: &'static str,
}

const CATALOG: [CatalogEntry; 6] = [
    CatalogEntry {
        id: "1",
        category: QuestionCategory::Part1,
        topic: "Hometown",
        text: "Where is your hometown?",
    },
    CatalogEntry {
        id: "2",
        category: QuestionCategory::Part1,
        topic: "Work/Study",
        text: "Do you work or are you a student?",
    },
    CatalogEntry {
        id: "3",
        category: QuestionCategory::Part1,
        topic: "Leisure",
        text: "What do you like to do in your free time?",
    },
    CatalogEntry {
        id: "4",
        category: QuestionCategory::Part2,
        topic: "Events",
        text: "Describe a time you were very busy. You should say: When it was, What you had to do, Why you were busy, and explain how you felt about it.",
    },
    CatalogEntry {
        id: "5",
        category: QuestionCategory::Part3,
        topic: "Technology",
        text: "How has technology changed the way people work in your country?",
    },
    CatalogEntry {
        id: "6",
        category: QuestionCategory::Part3,
        topic: "Environment",
        text: "What do you think is the most serious environmental problem today?",
    },
];

impl CatalogEntry {
    fn to_question(&self) -> Question {
        Question {
            id: self.id.to_string(),
            category: self.category,
            topic: self.topic.to_string(),
            text: self.text.to_string(),
        }
    }
}

pub fn all_questions() -> Vec<Question> {
    CATALOG.iter().map(CatalogEntry::to_question).collect()
}

pub fn first_question() -> Question {
    CATALOG[0].to_question()
}

pub fn find_question(id: &str) -> Option<Question> {
    CATALOG
        .iter()
        .find(|entry| entry.id == id.trim())
        .map(CatalogEntry::to_question)
}

/// Any catalog entry, including the current one.
pub fn random_question<R: Rng + ?Sized>(rng: &mut R) -> Question {
    CATALOG[rng.gen_range(0..CATALOG.len())].to_question()
}

/// Catalog entry after `current_id`, wrapping to the start. Unknown ids start over.
pub fn next_question(current_id: &str) -> Question {
    let next_index = CATALOG
        .iter()
        .position(|entry| entry.id == current_id)
        .map(|index| (index + 1) % CATALOG.len())
        .unwrap_or(0);
    CATALOG[next_index].to_question()
}
