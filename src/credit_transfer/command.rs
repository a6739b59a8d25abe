//! Inbound SMS command grammar
//!
//! ```text
//! transfer : DIGITS '*' AMOUNT
//! AMOUNT   : DIGITS* (',' DIGIT{3})* ('.' DIGITS*)?
//! confirm  : DIGIT{code_length}
//! ```
//!
//! Anything else is answered with the help text.

use super::types::ConfirmationCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsCommand {
    /// Amount is still in display units; the engine parses it against the
    /// network currency.
    Transfer { to_number: String, amount: String },
    Confirm(ConfirmationCode),
    Help,
}

pub fn parse_command(text: &str, code_length: usize) -> SmsCommand {
    let text = text.trim();

    if let Some((to_number, amount)) = text.split_once('*')
        && is_digits(to_number)
        && !to_number.is_empty()
        && is_amount(amount)
    {
        return SmsCommand::Transfer {
            to_number: to_number.to_string(),
            amount: amount.to_string(),
        };
    }

    if text.len() == code_length
        && let Some(code) = ConfirmationCode::parse(text)
    {
        return SmsCommand::Confirm(code);
    }

    SmsCommand::Help
}

#[inline]
fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn is_amount(s: &str) -> bool {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if !is_digits(frac) {
        return false;
    }
    let mut groups = whole.split(',');
    let leading = groups.next().unwrap_or_default();
    is_digits(leading) && groups.all(|g| g.len() == 3 && is_digits(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(to: &str, amount: &str) -> SmsCommand {
        SmsCommand::Transfer {
            to_number: to.into(),
            amount: amount.into(),
        }
    }

    #[test]
    fn test_transfer_forms() {
        assert_eq!(parse_command("5551002*2000", 5), transfer("5551002", "2000"));
        assert_eq!(parse_command(" 5551002*2,000.50 ", 5), transfer("5551002", "2,000.50"));
        assert_eq!(parse_command("5551002*1,234,567", 5), transfer("5551002", "1,234,567"));
        assert_eq!(parse_command("5551002*.5", 5), transfer("5551002", ".5"));
        assert_eq!(parse_command("5551002*5.", 5), transfer("5551002", "5."));
        // The grammar admits an empty amount; amount parsing rejects it later.
        assert_eq!(parse_command("5551002*", 5), transfer("5551002", ""));
    }

    #[test]
    fn test_malformed_transfers_get_help() {
        for text in [
            "*100",
            "555a*100",
            "5551002*1,00",
            "5551002*1,0000",
            "5551002*1.2.3",
            "5551002*-100",
            "5551002*100*2",
            "5551002 * 100",
        ] {
            assert_eq!(parse_command(text, 5), SmsCommand::Help, "{}", text);
        }
    }

    #[test]
    fn test_confirmation_code_length() {
        assert_eq!(
            parse_command("48213", 5),
            SmsCommand::Confirm(ConfirmationCode::parse("48213").unwrap())
        );
        assert_eq!(parse_command("4821", 5), SmsCommand::Help);
        assert_eq!(parse_command("482139", 5), SmsCommand::Help);
        assert_eq!(
            parse_command("482139", 6),
            SmsCommand::Confirm(ConfirmationCode::parse("482139").unwrap())
        );
        assert_eq!(parse_command("4821x", 5), SmsCommand::Help);
        assert_eq!(parse_command("", 5), SmsCommand::Help);
        assert_eq!(parse_command("help", 5), SmsCommand::Help);
    }
}
