// ===============================
// src/console.rs
// ===============================
//
// Line-oriented stdin front end for the headless shell.
//
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{PlayerDelta, TxRequest, STOCK_KINDS};

pub const HELP: &str = "commands: buy-stock q1..q5 | sell-stock q1..q5 | gold N | loan N | \
repay N | chat TEXT | move X Y Z | ready | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Tx(TxRequest),
    Move(PlayerDelta),
    Chat(String),
    Ready,
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{cmd}` expects {expected}")]
    Arity { cmd: &'static str, expected: &'static str },
    #[error("`{0}` is not a valid number")]
    Number(String),
}

fn num<T: std::str::FromStr>(s: &str) -> Result<T, ParseError> {
    s.parse().map_err(|_| ParseError::Number(s.to_string()))
}

fn one<T: std::str::FromStr>(cmd: &'static str, args: &[&str]) -> Result<T, ParseError> {
    match args {
        [n] => num(n),
        _ => Err(ParseError::Arity { cmd, expected: "one number" }),
    }
}

fn quantities(cmd: &'static str, args: &[&str]) -> Result<[u32; STOCK_KINDS], ParseError> {
    if args.len() != STOCK_KINDS {
        return Err(ParseError::Arity { cmd, expected: "five quantities" });
    }
    let mut q = [0u32; STOCK_KINDS];
    for (slot, raw) in q.iter_mut().zip(args) {
        *slot = num(raw)?;
    }
    Ok(q)
}

/// `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Input>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();

    let input = match cmd.to_ascii_lowercase().as_str() {
        "buy-stock" => Input::Tx(TxRequest::BuyStock(quantities("buy-stock", &args)?)),
        "sell-stock" => Input::Tx(TxRequest::SellStock(quantities("sell-stock", &args)?)),
        "gold" => Input::Tx(TxRequest::BuyGold(one("gold", &args)?)),
        "loan" => Input::Tx(TxRequest::TakeLoan(one("loan", &args)?)),
        "repay" => Input::Tx(TxRequest::RepayLoan(one("repay", &args)?)),
        "chat" => {
            let text = rest.trim();
            if text.is_empty() {
                return Err(ParseError::Arity { cmd: "chat", expected: "a message" });
            }
            Input::Chat(text.to_string())
        }
        "move" => match args.as_slice() {
            [x, y, z] => {
                let position = [num(x)?, num(y)?, num(z)?];
                Input::Move(PlayerDelta { position: Some(position), ..PlayerDelta::default() })
            }
            _ => return Err(ParseError::Arity { cmd: "move", expected: "x y z" }),
        },
        "ready" => Input::Ready,
        "quit" | "exit" => Input::Quit,
        "help" | "?" => Input::Help,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(input))
}

/// Forward parsed stdin lines until EOF or `quit`.
pub async fn run(tx: mpsc::Sender<Input>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse(&line) {
            Ok(Some(input)) => {
                let quit = input == Input::Quit;
                if tx.send(input).await.is_err() || quit {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "{HELP}"),
        }
    }
    let _ = tx.send(Input::Quit).await;
}
