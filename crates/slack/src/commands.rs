//! Grammar of `<feature-prefix> <operation> <argument...>` commands typed into
//! ordinary channel messages.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureOperation {
    /// Take a display name off the feature's opt-out list.
    OptIn(String),
    OptOut(String),
    /// Link the sender's chat id to an id on the feature's service.
    Link(String),
}

impl FeatureOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OptIn(_) => "optin",
            Self::OptOut(_) => "optout",
            Self::Link(_) => "id",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("missing operation")]
    MissingOperation,
    #[error("operation `{0}` requires an argument")]
    MissingArgument(&'static str),
}

/// A message addressed to one feature. `operation` carries the parse outcome
/// so callers can still answer malformed commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureCommand<'a> {
    pub prefix: &'a str,
    pub operation: Result<FeatureOperation, CommandParseError>,
}

/// Returns `None` when the first token is not one of `prefixes`.
pub fn parse_feature_command<'a, I>(text: &str, prefixes: I) -> Option<FeatureCommand<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    let text = text.trim();
    let (head, rest) = split_token(text);
    let prefix = prefixes.into_iter().find(|prefix| *prefix == head)?;

    Some(FeatureCommand { prefix, operation: parse_operation(rest) })
}

fn parse_operation(input: &str) -> Result<FeatureOperation, CommandParseError> {
    let (operation, argument) = split_token(input);
    if operation.is_empty() {
        return Err(CommandParseError::MissingOperation);
    }

    let required = |name: &'static str| {
        if argument.is_empty() {
            Err(CommandParseError::MissingArgument(name))
        } else {
            Ok(argument.to_owned())
        }
    };

    match operation {
        "optin" => required("optin").map(FeatureOperation::OptIn),
        "optout" => required("optout").map(FeatureOperation::OptOut),
        "id" => required("id").map(FeatureOperation::Link),
        other => Err(CommandParseError::UnknownOperation(other.to_owned())),
    }
}

fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(index) => (&input[..index], input[index..].trim()),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_feature_command, CommandParseError, FeatureOperation};

    const PREFIXES: [&str; 2] = ["@sleep-battle", "@exercise"];

    #[test]
    fn parses_each_operation() {
        let command = parse_feature_command("@sleep-battle optout bob", PREFIXES).expect("match");
        assert_eq!(command.prefix, "@sleep-battle");
        assert_eq!(command.operation, Ok(FeatureOperation::OptOut("bob".to_owned())));

        let command = parse_feature_command("@sleep-battle optin bob", PREFIXES).expect("match");
        assert_eq!(command.operation, Ok(FeatureOperation::OptIn("bob".to_owned())));

        let command = parse_feature_command("@exercise id ABC123", PREFIXES).expect("match");
        assert_eq!(command.prefix, "@exercise");
        assert_eq!(command.operation, Ok(FeatureOperation::Link("ABC123".to_owned())));
    }

    #[test]
    fn argument_keeps_inner_spaces_and_trims_edges() {
        let command =
            parse_feature_command("  @sleep-battle   optout   Bob Smith  ", PREFIXES).expect("match");
        assert_eq!(command.operation, Ok(FeatureOperation::OptOut("Bob Smith".to_owned())));
    }

    #[test]
    fn other_messages_are_not_commands() {
        assert!(parse_feature_command("hello @sleep-battle optout bob", PREFIXES).is_none());
        assert!(parse_feature_command("@sleep-battler optout bob", PREFIXES).is_none());
        assert!(parse_feature_command("@Sleep-Battle optout bob", PREFIXES).is_none());
        assert!(parse_feature_command("", PREFIXES).is_none());
    }

    #[test]
    fn malformed_commands_still_match_their_feature() {
        let command = parse_feature_command("@sleep-battle dance", PREFIXES).expect("match");
        assert_eq!(command.operation, Err(CommandParseError::UnknownOperation("dance".to_owned())));

        let command = parse_feature_command("@sleep-battle optout", PREFIXES).expect("match");
        assert_eq!(command.operation, Err(CommandParseError::MissingArgument("optout")));

        let command = parse_feature_command("@sleep-battle", PREFIXES).expect("match");
        assert_eq!(command.operation, Err(CommandParseError::MissingOperation));
    }
}
