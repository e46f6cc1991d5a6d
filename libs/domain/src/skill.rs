use serde::{Deserialize, Serialize};

/// Skill an agent offers or a call requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    English,
    Spanish,
    German,
    CarInsurance,
    PropertyInsurance,
    LifeInsurance,
}

impl std::fmt::Display for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Skill::English => "english",
            Skill::Spanish => "spanish",
            Skill::German => "german",
            Skill::CarInsurance => "car_insurance",
            Skill::PropertyInsurance => "property_insurance",
            Skill::LifeInsurance => "life_insurance",
        };
        write!(f, "{}", s)
    }
}
