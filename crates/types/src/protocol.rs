/// Tokens exchanged on a transaction's command port.
///
/// The wire strings are fixed by the protocol; both sides of the handshake
/// round-trip them through `Display`/`FromStr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Command {
    #[strum(serialize = "not_interested")]
    NotInterested,
    #[strum(serialize = "interested")]
    Interested,
    #[strum(serialize = "aborted")]
    Aborted,
    #[strum(serialize = "can_commit?")]
    CanCommit,
    #[strum(serialize = "prepared")]
    Prepared,
    #[strum(serialize = "do_commit")]
    DoCommit,
    #[strum(serialize = "do_abort")]
    DoAbort,
    #[strum(serialize = "done")]
    Done
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn wire_strings_are_exact() {
        let expected = [
            (Command::NotInterested, "not_interested"),
            (Command::Interested, "interested"),
            (Command::Aborted, "aborted"),
            (Command::CanCommit, "can_commit?"),
            (Command::Prepared, "prepared"),
            (Command::DoCommit, "do_commit"),
            (Command::DoAbort, "do_abort"),
            (Command::Done, "done"),
        ];
        for (command, wire) in expected {
            assert_eq!(command.to_string(), wire);
            assert_eq!(Command::from_str(wire).unwrap(), command);
        }
    }
}
