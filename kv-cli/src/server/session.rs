use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use log::info;
use rustyline::config::Builder;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Editor};
use tokio::time::Instant;

use kv_rs::engine::Database;
use kv_rs::envelope::TxId;
use kv_rs::error::Error;
use kv_rs::eviction::EvictionPolicy;
use kv_rs::info::get_info;
use kv_rs::mvcc::transaction::IsolationLevel;
use kv_rs::row::rows::ServerStats;

use crate::ast::token_kind::TokenKind;
use crate::ast::tokenizer::Tokenizer;
use crate::rusty::CliHelper;
use crate::server::config::{ConfigLoad, DEFAULT_PROMPT};
use crate::show::Show;

/// Runs the REPL/batch loop and dispatches each parsed command line to a
/// `Database`. Not a wire-protocol server: one process, one in-memory store.
pub struct Session {
    is_repl: bool,

    running: Arc<AtomicBool>,
    db: Database,
    current_tx: Option<TxId>,

    settings: ConfigLoad,
    query: String,
    in_comment_block: bool,

    keywords: Arc<Vec<String>>,
}

impl Session {
    pub async fn try_new(settings: ConfigLoad, is_repl: bool, running: Arc<AtomicBool>) -> Result<Self> {
        if is_repl {
            println!("Welcome to {}.", DEFAULT_PROMPT);
            println!();
        }

        let db = Database::new(EvictionPolicy::AllKeysLru);
        let maxmemory = settings.get_maxmemory();
        if maxmemory > 0 {
            db.set_max_memory(maxmemory as usize);
        }

        Ok(Self {
            is_repl,
            running,
            db,
            current_tx: None,
            settings,
            query: String::new(),
            in_comment_block: false,
            keywords: Arc::new(all_command_keywords()),
        })
    }

    async fn prompt(&self) -> String {
        if !self.query.trim().is_empty() {
            format!("{} > ", DEFAULT_PROMPT)
        } else {
            match self.settings.prompt.as_ref() {
                Some(prompt) => format!("{} > ", prompt.trim_end()),
                None => format!("{} > ", DEFAULT_PROMPT),
            }
        }
    }

    pub async fn handle_repl(&mut self) {
        let config = Builder::new()
            .completion_prompt_limit(5)
            .completion_type(CompletionType::Circular)
            .build();
        let mut rl = Editor::<CliHelper, DefaultHistory>::with_config(config).unwrap();

        rl.set_helper(Some(CliHelper::with_keywords(self.keywords.clone())));
        rl.load_history(&get_history_path()).ok();

        'repl: loop {
            if !self.running.load(Ordering::SeqCst) {
                break 'repl;
            }

            match rl.readline(&self.prompt().await) {
                Ok(line) => {
                    let queries = self.append_query(&line);
                    for query in queries {
                        let _ = rl.add_history_entry(&query);
                        match self.handle_query(true, &query).await {
                            Ok(None) => break 'repl,
                            Ok(Some(_)) => {}
                            Err(e) => {
                                eprintln!("error: {}", e);
                                self.query.clear();
                                break;
                            }
                        }
                    }
                }
                Err(e) => match e {
                    ReadlineError::Io(err) => eprintln!("io err: {err}"),
                    ReadlineError::Interrupted => {
                        println!("^C");
                        self.query.clear();
                        self.running.store(false, Ordering::SeqCst);
                    }
                    ReadlineError::Eof => break,
                    _ => {}
                },
            }
        }

        println!("Bye~");
        let _ = rl.save_history(&get_history_path());
    }

    pub async fn handle_reader<R: BufRead>(&mut self, r: R) -> Result<()> {
        let start = Instant::now();
        let mut lines = r.lines();

        loop {
            match lines.next() {
                Some(Ok(line)) => {
                    let queries = self.append_query(&line);
                    for query in queries {
                        self.handle_query(false, &query).await?;
                    }
                }
                Some(Err(e)) => return Err(anyhow!("read lines err: {}", e)),
                None => break,
            }
        }

        let query = self.query.trim().to_owned();
        if !query.is_empty() {
            self.query.clear();
            self.handle_query(false, &query).await?;
        }

        if self.settings.show_stats.unwrap_or(false) {
            println!("{:.3}", start.elapsed().as_secs_f64());
        }

        Ok(())
    }

    /// Appends an input line onto the in-progress query, splitting out
    /// complete statements terminated by `;` (or left as one-shot commands
    /// for control/exit lines that never need a terminator).
    fn append_query(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() {
            return vec![];
        }

        if self.query.is_empty()
            && (line.starts_with('.') || line == "exit" || line == "quit")
        {
            return vec![line.to_owned()];
        }

        if !self.settings.get_auto_append_part_cmd() {
            return vec![line.to_owned()];
        }

        if self.settings.multi_line == Some(false) {
            return if line.starts_with("--") { vec![] } else { vec![line.to_owned()] };
        }

        self.query.push(' ');

        let mut queries = Vec::new();
        let mut tokenizer = Tokenizer::new(line);
        let mut in_comment = false;
        let mut start = 0;
        let mut comment_block_start = 0;

        while let Some(Ok(token)) = tokenizer.next() {
            match token.kind {
                TokenKind::SemiColon => {
                    if !(in_comment || self.in_comment_block) {
                        let sql = self.query.trim().to_owned();
                        if !sql.is_empty() {
                            queries.push(sql);
                        }
                        self.query.clear();
                    }
                }
                TokenKind::Comment => in_comment = true,
                TokenKind::EOI => in_comment = false,
                TokenKind::Newline => {
                    in_comment = false;
                    self.query.push('\n');
                }
                TokenKind::CommentBlockStart => {
                    if !self.in_comment_block {
                        comment_block_start = token.span.start;
                    }
                    self.in_comment_block = true;
                }
                TokenKind::CommentBlockEnd => {
                    self.in_comment_block = false;
                    self.query.push_str(&line[comment_block_start..token.span.end]);
                }
                _ => {
                    if !in_comment && !self.in_comment_block {
                        self.query.push_str(&line[start..token.span.end]);
                    }
                }
            }
            start = token.span.end;
        }

        if self.in_comment_block {
            self.query.push_str(&line[comment_block_start..]);
        }

        queries
    }

    async fn handle_query(&mut self, is_repl: bool, query: &str) -> Result<Option<ServerStats>> {
        let query = query.trim_end_matches(';').trim();
        if query.is_empty() {
            return Ok(Some(ServerStats::default()));
        }
        if is_repl && (query == "exit" || query == "quit") {
            return Ok(None);
        }

        if is_repl && query.starts_with('.') {
            let parts = query.trim_start_matches('.').split_whitespace().collect::<Vec<_>>();
            if parts.len() != 2 {
                return Err(anyhow!("Control command error, must be syntax of `.cmd_name cmd_value`."));
            }
            self.settings.inject_cmd(parts[0], parts[1])?;
            info!("refresh config: {:?}", &self.settings);
            eprintln!("Refresh Config OK ~");
            return Ok(Some(ServerStats::default()));
        }

        let args = split_args(query)?;
        if args.is_empty() {
            return Ok(Some(ServerStats::default()));
        }

        let start = Instant::now();
        let show = Show::new_with_start(self.settings.is_show_affected(), is_repl, start);
        let affected = self.dispatch(is_repl, &args).await?;
        show.output(affected);

        Ok(Some(ServerStats::default()))
    }

    /// Runs one already-tokenized command against `self.db`, printing its
    /// result to stdout/stderr in REPL mode the way Redis's own `redis-cli`
    /// does, and returns a rows-affected count for `Show`.
    async fn dispatch(&mut self, is_repl: bool, args: &[String]) -> Result<i64> {
        let verb = args[0].to_ascii_uppercase();
        let a = |i: usize| args.get(i).map(|s| s.as_bytes()).unwrap_or_default();
        let tx = self.current_tx;

        macro_rules! need {
            ($n:expr, $usage:expr) => {
                if args.len() != $n {
                    eprintln!("wrong number of arguments for '{}', usage: {}", verb, $usage);
                    return Ok(());
                }
            };
        }

        let result: std::result::Result<(), Error> = (|| {
            match verb.as_str() {
                "INFO" => {
                    if is_repl {
                        for line in get_info(&self.db) {
                            eprintln!("{}", line);
                        }
                    }
                }
                "TIME" => {
                    if is_repl {
                        let now: DateTime<Local> = Local::now();
                        eprintln!("{}", now.format("%Y-%m-%d %H:%M:%S%.3f"));
                    }
                }
                "KSIZE" | "DBSIZE" => {
                    let size = self.db.dbsize()?;
                    if is_repl {
                        eprintln!("{}", size);
                    }
                }
                "KEYS" => {
                    need!(2, "KEYS <prefix>");
                    for key in self.db.keys(a(1))? {
                        eprintln!("{}", String::from_utf8_lossy(&key));
                    }
                }
                "FLUSHDB" => {
                    self.db.flushdb()?;
                    eprintln!("OK ~");
                }
                "SET" => {
                    need!(3, "SET <key> <value>");
                    self.db.set(tx, a(1), a(2).to_vec(), None)?;
                    eprintln!("OK ~");
                }
                "GET" => {
                    need!(2, "GET <key>");
                    match self.db.get(tx, a(1))? {
                        Some(v) => eprintln!("{}", String::from_utf8_lossy(&v)),
                        None => eprintln!("N/A ~"),
                    }
                }
                "DEL" | "DELETE" => {
                    need!(2, "DEL <key>");
                    let existed = self.db.del(tx, a(1))?;
                    eprintln!("{}", if existed { "OK ~" } else { "N/A ~" });
                }
                "EXISTS" => {
                    need!(2, "EXISTS <key>");
                    eprintln!("{}", self.db.exists(tx, a(1))?);
                }
                "INCR" => {
                    need!(2, "INCR <key>");
                    eprintln!("{}", self.db.incr(tx, a(1))?);
                }
                "DECR" => {
                    need!(2, "DECR <key>");
                    eprintln!("{}", self.db.decr(tx, a(1))?);
                }
                "EXPIRE" => {
                    need!(3, "EXPIRE <key> <seconds>");
                    let secs: u64 = parse_arg(&args[2])?;
                    eprintln!("{}", self.db.expire(tx, a(1), secs)?);
                }
                "TTL" => {
                    need!(2, "TTL <key>");
                    eprintln!("{}", self.db.ttl(tx, a(1))?.unwrap_or(-2));
                }
                "HSET" => {
                    need!(4, "HSET <key> <field> <value>");
                    eprintln!("{}", self.db.hset(tx, a(1), a(2).to_vec(), a(3).to_vec())?);
                }
                "HGET" => {
                    need!(3, "HGET <key> <field>");
                    match self.db.hget(tx, a(1), a(2))? {
                        Some(v) => eprintln!("{}", String::from_utf8_lossy(&v)),
                        None => eprintln!("N/A ~"),
                    }
                }
                "HGETALL" => {
                    need!(2, "HGETALL <key>");
                    for (f, v) in self.db.hgetall(tx, a(1))? {
                        eprintln!("{} {}", String::from_utf8_lossy(&f), String::from_utf8_lossy(&v));
                    }
                }
                "HDEL" => {
                    need!(3, "HDEL <key> <field>");
                    eprintln!("{}", self.db.hdel(tx, a(1), a(2))?);
                }
                "HLEN" => {
                    need!(2, "HLEN <key>");
                    eprintln!("{}", self.db.hlen(tx, a(1))?);
                }
                "LPUSH" => {
                    need!(3, "LPUSH <key> <value>");
                    eprintln!("{}", self.db.lpush(tx, a(1), a(2).to_vec())?);
                }
                "RPUSH" => {
                    need!(3, "RPUSH <key> <value>");
                    eprintln!("{}", self.db.rpush(tx, a(1), a(2).to_vec())?);
                }
                "LRANGE" => {
                    need!(4, "LRANGE <key> <start> <stop>");
                    let start: i64 = parse_arg(&args[2])?;
                    let stop: i64 = parse_arg(&args[3])?;
                    for item in self.db.lrange(tx, a(1), start, stop)? {
                        eprintln!("{}", String::from_utf8_lossy(&item));
                    }
                }
                "LLEN" => {
                    need!(2, "LLEN <key>");
                    eprintln!("{}", self.db.llen(tx, a(1))?);
                }
                "SADD" => {
                    need!(3, "SADD <key> <member>");
                    eprintln!("{}", self.db.sadd(tx, a(1), a(2).to_vec())?);
                }
                "SREM" => {
                    need!(3, "SREM <key> <member>");
                    eprintln!("{}", self.db.srem(tx, a(1), a(2))?);
                }
                "SMEMBERS" => {
                    need!(2, "SMEMBERS <key>");
                    for m in self.db.smembers(tx, a(1))? {
                        eprintln!("{}", String::from_utf8_lossy(&m));
                    }
                }
                "SCARD" => {
                    need!(2, "SCARD <key>");
                    eprintln!("{}", self.db.scard(tx, a(1))?);
                }
                "ZADD" => {
                    need!(4, "ZADD <key> <score> <member>");
                    let score: f64 = parse_arg(&args[2])?;
                    self.db.zadd(tx, a(1), a(3).to_vec(), score)?;
                    eprintln!("OK ~");
                }
                "ZSCORE" => {
                    need!(3, "ZSCORE <key> <member>");
                    match self.db.zscore(tx, a(1), a(2))? {
                        Some(score) => eprintln!("{}", score),
                        None => eprintln!("N/A ~"),
                    }
                }
                "ZCARD" => {
                    need!(2, "ZCARD <key>");
                    eprintln!("{}", self.db.zcard(tx, a(1))?);
                }
                "ZRANGE" => {
                    need!(4, "ZRANGE <key> <start> <stop>");
                    let start: i64 = parse_arg(&args[2])?;
                    let stop: i64 = parse_arg(&args[3])?;
                    for (member, score) in self.db.zrange(tx, a(1), start, stop, false)? {
                        eprintln!("{} {}", String::from_utf8_lossy(&member), score);
                    }
                }
                "SETBIT" => {
                    need!(4, "SETBIT <key> <offset> <0|1>");
                    let offset: usize = parse_arg(&args[2])?;
                    let bit = args[3] == "1";
                    eprintln!("{}", self.db.setbit(tx, a(1), offset, bit)?);
                }
                "GETBIT" => {
                    need!(3, "GETBIT <key> <offset>");
                    let offset: usize = parse_arg(&args[2])?;
                    eprintln!("{}", self.db.getbit(tx, a(1), offset)?);
                }
                "PFADD" => {
                    need!(3, "PFADD <key> <element>");
                    eprintln!("{}", self.db.pfadd(tx, a(1), a(2))?);
                }
                "PFCOUNT" => {
                    if args.len() < 2 {
                        eprintln!("wrong number of arguments for 'PFCOUNT'");
                        return Ok(());
                    }
                    let keys: Vec<&[u8]> = args[1..].iter().map(|s| s.as_bytes()).collect();
                    eprintln!("{}", self.db.pfcount(tx, &keys)?);
                }
                "BEGIN" => {
                    let id = self.db.begin(IsolationLevel::RepeatableRead)?;
                    self.current_tx = Some(id);
                    eprintln!("OK ~ tx {}", id);
                }
                "COMMIT" => {
                    if let Some(id) = self.current_tx.take() {
                        self.db.commit(id)?;
                        eprintln!("OK ~");
                    } else {
                        eprintln!("no transaction in progress");
                    }
                }
                "ROLLBACK" => {
                    if let Some(id) = self.current_tx.take() {
                        self.db.rollback(id)?;
                        eprintln!("OK ~");
                    } else {
                        eprintln!("no transaction in progress");
                    }
                }
                _ => {
                    eprintln!("UnImplement command: [{}]", verb);
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(1),
            Err(e) => {
                eprintln!("{}", e);
                Ok(0)
            }
        }
    }
}

fn parse_arg<T: std::str::FromStr>(s: &str) -> std::result::Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    s.parse().map_err(|e| Error::InvalidArgument(format!("{}", e)))
}

/// Splits a command line into whitespace-separated arguments, honoring
/// single/double-quoted substrings (so `SET greeting "hello world"` passes
/// a single two-word value).
fn split_args(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();
    let mut current = String::new();
    let mut in_token = false;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                in_token = true;
                let quote = c;
                for c in chars.by_ref() {
                    if c == quote {
                        break;
                    }
                    current.push(c);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}

fn all_command_keywords() -> Vec<String> {
    [
        "SET", "GET", "DEL", "EXISTS", "INCR", "DECR", "EXPIRE", "TTL", "HSET", "HGET", "HGETALL",
        "HDEL", "HLEN", "LPUSH", "RPUSH", "LRANGE", "LLEN", "SADD", "SREM", "SMEMBERS", "SCARD",
        "ZADD", "ZSCORE", "ZCARD", "ZRANGE", "SETBIT", "GETBIT", "PFADD", "PFCOUNT", "BEGIN",
        "COMMIT", "ROLLBACK", "FLUSHDB", "KEYS", "KSIZE", "INFO", "TIME", "EXIT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn get_history_path() -> String {
    format!("{}/.kvcli_history", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_args_honors_quotes() {
        let args = split_args(r#"SET greeting "hello world""#).unwrap();
        assert_eq!(args, vec!["SET", "greeting", "hello world"]);
    }

    #[test]
    fn split_args_splits_plain_whitespace() {
        let args = split_args("GET k").unwrap();
        assert_eq!(args, vec!["GET", "k"]);
    }
}
