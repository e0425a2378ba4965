use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kinds of context document the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentType {
    BusinessProfile,
    StyleGuide,
    PersonalBio,
    OfferDocumentation,
    TargetMarketAudience,
    SalesMessagingPlaybook,
}

/// Section structure and voice for one document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentTemplate {
    pub title: &'static str,
    pub role: &'static str,
    pub tone: &'static str,
    pub sections: &'static [&'static str],
}

const BUSINESS_PROFILE: DocumentTemplate = DocumentTemplate {
    title: "Business Profile",
    role: "You are a business analyst writing a reference profile of a company for AI assistants.",
    tone: "Factual, concise and third-person.",
    sections: &[
        "Company Overview",
        "Mission and Values",
        "Products and Services",
        "Target Customers",
        "Competitive Positioning",
        "Operations and Team",
    ],
};

const STYLE_GUIDE: DocumentTemplate = DocumentTemplate {
    title: "Brand Style Guide",
    role: "You are a brand strategist codifying how a brand writes and sounds.",
    tone: "Prescriptive and example-driven.",
    sections: &[
        "Brand Voice",
        "Tone by Context",
        "Vocabulary: Preferred and Avoided",
        "Grammar and Formatting Rules",
        "Example Rewrites",
    ],
};

const PERSONAL_BIO: DocumentTemplate = DocumentTemplate {
    title: "Personal Bio",
    role: "You are a professional biographer capturing a person's background and expertise.",
    tone: "Warm, credible and written in the third person.",
    sections: &[
        "Short Bio",
        "Professional Background",
        "Areas of Expertise",
        "Notable Achievements",
        "Personal Interests",
    ],
};

const OFFER_DOCUMENTATION: DocumentTemplate = DocumentTemplate {
    title: "Offer Documentation",
    role: "You are a product marketer documenting an offer so it can be sold accurately.",
    tone: "Clear, benefit-led and specific about terms.",
    sections: &[
        "Offer Summary",
        "Who It Is For",
        "Deliverables and Features",
        "Pricing and Terms",
        "Objections and Answers",
        "Guarantees",
    ],
};

const TARGET_MARKET_AUDIENCE: DocumentTemplate = DocumentTemplate {
    title: "Target Market & Audience",
    role: "You are a market researcher describing an ideal customer profile.",
    tone: "Empathetic and evidence-based.",
    sections: &[
        "Market Overview",
        "Ideal Customer Profile",
        "Pain Points",
        "Goals and Desires",
        "Buying Triggers",
        "Where They Spend Time",
    ],
};

const SALES_MESSAGING_PLAYBOOK: DocumentTemplate = DocumentTemplate {
    title: "Sales Messaging Playbook",
    role: "You are a sales enablement lead writing a messaging playbook for a sales team.",
    tone: "Direct, persuasive and practical.",
    sections: &[
        "Core Value Proposition",
        "Key Messages by Persona",
        "Discovery Questions",
        "Objection Handling",
        "Proof Points",
        "Calls to Action",
    ],
};

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::BusinessProfile,
        DocumentType::StyleGuide,
        DocumentType::PersonalBio,
        DocumentType::OfferDocumentation,
        DocumentType::TargetMarketAudience,
        DocumentType::SalesMessagingPlaybook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::BusinessProfile => "businessProfile",
            DocumentType::StyleGuide => "styleGuide",
            DocumentType::PersonalBio => "personalBio",
            DocumentType::OfferDocumentation => "offerDocumentation",
            DocumentType::TargetMarketAudience => "targetMarketAudience",
            DocumentType::SalesMessagingPlaybook => "salesMessagingPlaybook",
        }
    }

    pub fn template(&self) -> &'static DocumentTemplate {
        match self {
            DocumentType::BusinessProfile => &BUSINESS_PROFILE,
            DocumentType::StyleGuide => &STYLE_GUIDE,
            DocumentType::PersonalBio => &PERSONAL_BIO,
            DocumentType::OfferDocumentation => &OFFER_DOCUMENTATION,
            DocumentType::TargetMarketAudience => &TARGET_MARKET_AUDIENCE,
            DocumentType::SalesMessagingPlaybook => &SALES_MESSAGING_PLAYBOOK,
        }
    }
}

impl FromStr for DocumentType {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        DocumentType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| CoreError::UnknownDocumentType(trimmed.to_string()))
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tag() {
        for kind in DocumentType::ALL {
            assert_eq!(kind.as_str().parse::<DocumentType>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_tag_matches_as_str() {
        for kind in DocumentType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = "pressRelease".parse::<DocumentType>().unwrap_err();
        assert_eq!(err, CoreError::UnknownDocumentType("pressRelease".to_string()));
    }

    #[test]
    fn every_template_has_sections() {
        for kind in DocumentType::ALL {
            assert!(!kind.template().sections.is_empty());
        }
    }
}
