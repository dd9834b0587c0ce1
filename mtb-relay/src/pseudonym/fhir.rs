use serde::{Deserialize, Serialize};

const PARAMETERS: &str = "Parameters";

/// The subset of the FHIR R4 `Parameters` resource used by the gPAS
/// `$pseudonymizeAllowCreate` operation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub part: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Parameters {
    /// Request body asking gPAS for the pseudonym of `original` in the `target` domain.
    pub fn pseudonym_request(target: &str, original: &str) -> Self {
        Self {
            resource_type: PARAMETERS.to_owned(),
            parameter: vec![
                Parameter::string("target", target),
                Parameter::string("original", original),
            ],
        }
    }

    /// The identifier in the `pseudonym` part of the first parameter, if any.
    pub fn first_pseudonym(&self) -> Option<&Identifier> {
        self.parameter
            .first()?
            .part
            .iter()
            .find(|part| part.name == "pseudonym")?
            .value_identifier
            .as_ref()
    }
}

impl Parameter {
    fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value_string: Some(value.to_owned()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_request() {
        let request = Parameters::pseudonym_request("PSN", "P1");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "resourceType": "Parameters",
                "parameter": [
                    {"name": "target", "valueString": "PSN"},
                    {"name": "original", "valueString": "P1"}
                ]
            })
        );
    }

    #[test]
    fn finds_pseudonym_in_gpas_response() {
        let response: Parameters = serde_json::from_value(json!({
            "resourceType": "Parameters",
            "parameter": [{
                "name": "pseudonym",
                "part": [
                    {"name": "original", "valueIdentifier": {"system": "https://ths-greifswald.de/gpas", "value": "P1"}},
                    {"name": "target", "valueIdentifier": {"system": "https://ths-greifswald.de/gpas", "value": "PSN"}},
                    {"name": "pseudonym", "valueIdentifier": {"system": "https://ths-greifswald.de/gpas", "value": "PSN_42"}}
                ]
            }]
        }))
        .unwrap();

        let pseudonym = response.first_pseudonym().expect("pseudonym part");
        assert_eq!(
            pseudonym.system.as_deref(),
            Some("https://ths-greifswald.de/gpas")
        );
        assert_eq!(pseudonym.value.as_deref(), Some("PSN_42"));
    }

    #[test]
    fn only_the_first_parameter_is_consulted() {
        let response: Parameters = serde_json::from_value(json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "other", "part": [{"name": "original", "valueString": "P1"}]},
                {"name": "pseudonym", "part": [{"name": "pseudonym", "valueIdentifier": {"system": "S", "value": "V"}}]}
            ]
        }))
        .unwrap();
        assert_eq!(response.first_pseudonym(), None);
    }

    #[test]
    fn empty_response_has_no_pseudonym() {
        let response: Parameters =
            serde_json::from_value(json!({"resourceType": "Parameters"})).unwrap();
        assert_eq!(response.first_pseudonym(), None);
    }
}
