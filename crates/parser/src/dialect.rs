//! Statement forms the generic SQL dialect does not cover: triggers,
//! cursor commands, and SHOW introspection. These are single-line shapes,
//! recognized up front so `sqlparser` only sees standard SQL.

use crate::{
    ast::{Statement, TriggerAction, TriggerEvent, TriggerTiming},
    parse_expr, parse_select,
};
use common::{DbError, DbResult};
use regex::Regex;

pub(crate) fn parse_special(sql: &str) -> DbResult<Option<Statement>> {
    let text = sql.trim().trim_end_matches(';').trim();

    let simple: &[(&str, fn(&regex::Captures) -> DbResult<Statement>)] = &[
        (r"(?i)^SHOW\s+TABLES$", |_| Ok(Statement::ShowTables)),
        (r"(?i)^SHOW\s+VIEWS$", |_| Ok(Statement::ShowViews)),
        (r"(?i)^SHOW\s+TRIGGERS$", |_| Ok(Statement::ShowTriggers)),
        (r"(?i)^SHOW\s+COLUMNS\s+FROM\s+(\w+)$", |caps| {
            Ok(Statement::ShowColumns { table: caps[1].to_lowercase() })
        }),
        (r"(?i)^SHOW\s+INDEX(?:ES)?\s+FROM\s+(\w+)$", |caps| {
            Ok(Statement::ShowIndexes { table: caps[1].to_lowercase() })
        }),
        (r"(?i)^USE\s+(\w+)$", |caps| {
            Ok(Statement::UseDatabase { name: caps[1].to_lowercase() })
        }),
        (r"(?i)^OPEN\s+(\w+)$", |caps| {
            Ok(Statement::OpenCursor { name: caps[1].to_lowercase() })
        }),
        (r"(?i)^CLOSE\s+(\w+)$", |caps| {
            Ok(Statement::CloseCursor { name: caps[1].to_lowercase() })
        }),
        (r"(?i)^DROP\s+TRIGGER\s+(\w+)$", |caps| {
            Ok(Statement::DropTrigger { name: caps[1].to_lowercase() })
        }),
        (r"(?i)^FETCH\s+(?:(\d+)\s+FROM\s+)?(\w+)$", |caps| {
            let count = caps
                .get(1)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map_err(|_| DbError::Parser("invalid FETCH count".into()))?
                .unwrap_or(1);
            Ok(Statement::FetchCursor { name: caps[2].to_lowercase(), count })
        }),
    ];

    for (pattern, build) in simple {
        let re = Regex::new(pattern).expect("static regex");
        if let Some(caps) = re.captures(text) {
            return build(&caps).map(Some);
        }
    }

    let declare = Regex::new(r"(?is)^DECLARE\s+(\w+)\s+CURSOR\s+FOR\s+(.+)$").expect("static regex");
    if let Some(caps) = declare.captures(text) {
        let query = parse_select(&caps[2])?;
        return Ok(Some(Statement::DeclareCursor {
            name: caps[1].to_lowercase(),
            query: Box::new(query),
        }));
    }

    let trigger = Regex::new(
        r"(?is)^CREATE\s+TRIGGER\s+(\w+)\s+(BEFORE|AFTER)\s+(INSERT|UPDATE|DELETE)\s+ON\s+(\w+)(?:\s+FOR\s+EACH\s+ROW)?(?:\s+WHEN\s*\((.+?)\))?\s+SIGNAL\s+SQLSTATE\s+'([^']+)'(?:\s+SET\s+MESSAGE_TEXT\s*=\s*'([^']*)')?$",
    )
    .expect("static regex");
    if let Some(caps) = trigger.captures(text) {
        let timing = match caps[2].to_uppercase().as_str() {
            "BEFORE" => TriggerTiming::Before,
            _ => TriggerTiming::After,
        };
        let event = match caps[3].to_uppercase().as_str() {
            "INSERT" => TriggerEvent::Insert,
            "UPDATE" => TriggerEvent::Update,
            _ => TriggerEvent::Delete,
        };
        let condition = caps.get(5).map(|m| parse_expr(m.as_str())).transpose()?;
        return Ok(Some(Statement::CreateTrigger {
            name: caps[1].to_lowercase(),
            timing,
            event,
            table: caps[4].to_lowercase(),
            condition,
            action: TriggerAction::Signal {
                sqlstate: caps[6].to_string(),
                message: caps.get(7).map(|m| m.as_str().to_string()),
            },
        }));
    }

    Ok(None)
}
