use serde_json::Value;

use crate::domain::offer::OfferCatalog;
use crate::domain::phase::{AgentRole, Phase};
use crate::domain::registration::Registration;

const NO_INCENTIVES: &str =
    "INCENTIVES: No incentive data was provided. Look up the incentives that apply to the registration's zip code.\n";

/// What a phase message is built from. `offers` already carries the current
/// capacity snapshot.
#[derive(Clone, Copy, Debug)]
pub struct MessageInputs<'a> {
    pub registration: &'a Registration,
    pub offers: &'a OfferCatalog,
    pub matches: &'a [Value],
    pub incentives: Option<&'a Value>,
}

/// One section per participant, in declared order.
pub fn build_phase_message(phase: &Phase, inputs: &MessageInputs<'_>) -> String {
    phase.agents.iter().map(|agent| section(agent.role, inputs)).collect()
}

fn section(role: AgentRole, inputs: &MessageInputs<'_>) -> String {
    let label = capitalized(role.participant_name());
    match role {
        AgentRole::Producer1 => format!(
            "{label}: Match based on instructions in system prompt.\n\
             REGISTRATION: ```{}```\n\
             OFFERS: ```{}```\n",
            compact(&Value::Array(vec![inputs.registration.to_value()])),
            offers_json(inputs.offers),
        ),
        AgentRole::Producer2 => {
            let incentives = match inputs.incentives {
                Some(incentives) => format!("INCENTIVES: ```{}```\n", compact(incentives)),
                None => NO_INCENTIVES.to_string(),
            };
            format!(
                "{label}: Enrich matches with pricing and subsidies:\n\
                 MATCHES: ```{}```\n\
                 OFFERS: ```{}```\n\
                 {incentives}",
                compact(&Value::Array(inputs.matches.to_vec())),
                offers_json(inputs.offers),
            )
        }
        AgentRole::Reviewer1 | AgentRole::Reviewer2 => {
            let reviewed = role.reviewed_producer().map(AgentRole::participant_name).unwrap_or("");
            format!(
                "{label}: Review {}'s output and say 'APPROVE' if acceptable.\n",
                capitalized(reviewed)
            )
        }
    }
}

fn offers_json(offers: &OfferCatalog) -> String {
    serde_json::to_value(&offers.supplier_offers).map(|value| compact(&value)).unwrap_or_default()
}

fn compact(value: &Value) -> String {
    value.to_string()
}

fn capitalized(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::constellation::ConstellationRegistry;
    use crate::domain::offer::OfferCatalog;
    use crate::domain::registration::Registration;
    use crate::workflow::message::{build_phase_message, MessageInputs};

    fn registration() -> Registration {
        Registration::from_value(0, json!({"registration_id": "R1", "Contact_Zip": "1234"}))
            .expect("registration")
    }

    fn catalog() -> OfferCatalog {
        serde_json::from_value(json!({
            "SupplierOffers": [{"SupplierID": "S1", "ServiceAreas": ["1234"], "Capacity": 2}]
        }))
        .expect("catalog")
    }

    #[test]
    fn pair_phase_has_matcher_then_critic_sections() {
        let constellation = ConstellationRegistry::builtin().load("p1m1c1_p2m2c2").expect("load");
        let registration = registration();
        let offers = catalog();
        let inputs =
            MessageInputs { registration: &registration, offers: &offers, matches: &[], incentives: None };

        let message = build_phase_message(&constellation.phases[0], &inputs);

        assert!(message.starts_with("Matcher1: Match based on instructions in system prompt.\n"));
        assert!(message.contains(r#"REGISTRATION: ```[{"Contact_Zip":"1234","registration_id":"R1"}]```"#));
        assert!(message.contains(r#""SupplierID":"S1""#));
        assert!(message.ends_with("Critic1: Review Matcher1's output and say 'APPROVE' if acceptable.\n"));
    }

    #[test]
    fn enrichment_section_carries_matches_and_incentive_fallback() {
        let constellation = ConstellationRegistry::builtin().load("p1m1_p2m2").expect("load");
        let registration = registration();
        let offers = catalog();
        let matches = vec![json!({"registration_id": "R1", "supplier_id": "S1"})];
        let inputs = MessageInputs {
            registration: &registration,
            offers: &offers,
            matches: &matches,
            incentives: None,
        };

        let message = build_phase_message(&constellation.phases[1], &inputs);

        assert!(message.starts_with("Matcher2: Enrich matches with pricing and subsidies:\n"));
        assert!(message.contains(r#"MATCHES: ```[{"registration_id":"R1","supplier_id":"S1"}]```"#));
        assert!(message.ends_with(
            "INCENTIVES: No incentive data was provided. Look up the incentives that apply to the registration's zip code.\n"
        ));
        assert!(!message.contains("_tool"));

        let incentives = json!([{"zip": "1234", "amount": 500}]);
        let with_incentives = build_phase_message(
            &constellation.phases[1],
            &MessageInputs { incentives: Some(&incentives), ..inputs },
        );
        assert!(with_incentives.contains(r#"INCENTIVES: ```[{"amount":500,"zip":"1234"}]```"#));
    }
}
