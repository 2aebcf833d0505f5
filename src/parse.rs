use crate::command::{Command, GetCommand, PutCommand};

pub fn parse_command(input: &str) -> Result<Command, String> {
    let tokens = Lexer::new(input).lex()?;
    parse_tokens(tokens.into_iter())
}

#[derive(Debug)]
enum Keyword {
    Get,
    Put,
    Stats,
    Exit,
}

#[derive(Debug)]
enum Token {
    Keyword(Keyword),
    Ident(String),
    Literal(String),
}

#[derive(Debug)]
struct Lexer {
    input: Vec<char>,
    pos: usize,
    buffer: String,
    tokens: Vec<Token>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl Lexer {
    fn new(input: &str) -> Lexer {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            buffer: String::new(),
            tokens: Vec::new(),
        }
    }

    fn lex(mut self) -> Result<Vec<Token>, String> {
        while let Some(c) = self.input.get(self.pos) {
            if c.is_whitespace() {
                self.pos += 1;
            } else if is_ident_char(*c) {
                self.lex_ident();
            } else if c == &'"' {
                self.lex_literal()?;
            } else {
                return Err(format!("Unexpected character: {}", c));
            }
        }
        Ok(self.tokens)
    }

    fn lex_ident(&mut self) {
        while let Some(c) = self.input.get(self.pos) {
            if !is_ident_char(*c) {
                break;
            }
            self.buffer.push(*c);
            self.pos += 1;
        }

        let token = match self.buffer.as_str() {
            "GET" | "get" => Token::Keyword(Keyword::Get),
            "PUT" | "put" => Token::Keyword(Keyword::Put),
            "STATS" | "stats" => Token::Keyword(Keyword::Stats),
            "EXIT" | "exit" => Token::Keyword(Keyword::Exit),
            _ => Token::Ident(self.buffer.clone()),
        };
        self.tokens.push(token);
        self.buffer.clear();
    }

    fn lex_literal(&mut self) -> Result<(), String> {
        // Skip the first '"'
        self.pos += 1;

        let mut is_escaped = false;

        while let Some(c) = self.input.get(self.pos) {
            self.pos += 1;
            if is_escaped {
                let unescaped = match c {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    't' => '\t',
                    _ => return Err(format!("Invalid escaped character: {}", c)),
                };
                self.buffer.push(unescaped);
                is_escaped = false;
                continue;
            }
            match c {
                '"' => {
                    self.tokens.push(Token::Literal(self.buffer.clone()));
                    self.buffer.clear();
                    return Ok(());
                }
                '\\' => is_escaped = true,
                _ => self.buffer.push(*c),
            }
        }

        Err(format!("Unexpected end of input, {}", self.buffer))
    }
}

fn parse_tokens(mut tokens: impl Iterator<Item = Token>) -> Result<Command, String> {
    let command = match tokens.next() {
        None => return Err("Unexpected end of input".into()),
        Some(Token::Keyword(Keyword::Get)) => process_get_keyword(&mut tokens)?,
        Some(Token::Keyword(Keyword::Put)) => process_put_keyword(&mut tokens)?,
        Some(Token::Keyword(Keyword::Stats)) => Command::Stats,
        Some(Token::Keyword(Keyword::Exit)) => Command::Exit,
        Some(_) => return Err("Expected keyword GET, PUT, STATS or EXIT".into()),
    };
    if tokens.next().is_some() {
        return Err("Unexpected trailing input".to_string());
    }
    Ok(command)
}

fn parse_identifier(tokens: &mut impl Iterator<Item = Token>, keyword: &str) -> Result<String, String> {
    match tokens.next() {
        Some(Token::Ident(ident)) => Ok(ident),
        _ => Err(format!("Expected identifier after {}", keyword)),
    }
}

fn process_put_keyword(tokens: &mut impl Iterator<Item = Token>) -> Result<Command, String> {
    let ident = parse_identifier(tokens, "PUT")?;
    match tokens.next() {
        Some(Token::Literal(literal)) => Ok(Command::Put(PutCommand(ident, literal))),
        _ => Err("Expected literal after identifier".to_string()),
    }
}

fn process_get_keyword(tokens: &mut impl Iterator<Item = Token>) -> Result<Command, String> {
    let ident = parse_identifier(tokens, "GET")?;
    Ok(Command::Get(GetCommand(ident)))
}
