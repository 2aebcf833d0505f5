use crate::parse::parse_command;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct PutCommand(pub String, pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct GetCommand(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Put(PutCommand),
    Get(GetCommand),
    Stats,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_command(s)
    }
}
