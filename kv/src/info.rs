use crate::engine::Database;

pub fn get_info(db: &Database) -> Vec<String> {
    let mut infos = Vec::<String>::new();
    infos.push("kv storage:".to_string());

    let status = db.status();
    let (keys, commands_processed) = match status {
        Ok(s) => (s.keys, s.commands_processed),
        Err(_) => (0, 0),
    };
    infos.push(format!("keys: {}", keys));
    infos.push(format!("commands_processed: {}", commands_processed));

    infos
}
