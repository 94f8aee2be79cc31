use garde::Validate;
use serde::{Deserialize, Serialize};

/// Attributes inferred from an item's image by the vision model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct InferredItemAttributes {
    #[garde(length(min = 1, max = 100))]
    pub category: String,

    #[garde(skip)]
    pub colors: Vec<String>,

    #[garde(skip)]
    pub seasons: Vec<String>,

    #[garde(skip)]
    pub style_tags: Vec<String>,

    #[garde(skip)]
    pub pattern: Option<String>,

    #[garde(skip)]
    pub material_guess: Option<String>,
}

/// Fields read off a garment's care label by the vision model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CareLabelFields {
    #[garde(skip)]
    pub brand: Option<String>,

    #[garde(skip)]
    pub size: Option<String>,

    #[garde(skip)]
    pub material_composition: Option<String>,

    #[garde(skip)]
    pub care_instructions: Vec<String>,

    #[garde(skip)]
    pub country_of_origin: Option<String>,
}
