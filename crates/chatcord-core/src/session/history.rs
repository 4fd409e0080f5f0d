//! History trimming.

use crate::types::ChatMessage;

/// Bound `history` to `max_length` turns.
///
/// If a system turn exists anywhere in the history it is kept as the first
/// entry, followed by the last `max_length - 1` turns. Otherwise the last
/// `max_length` turns are kept. Call after appending the new user turn.
pub fn trim_history(history: Vec<ChatMessage>, max_length: usize) -> Vec<ChatMessage> {
    if history.len() <= max_length {
        return history;
    }

    let system = history.iter().find(|m| m.is_system()).cloned();
    match system {
        Some(system) if max_length > 0 => {
            let keep = max_length - 1;
            let tail = history.len() - keep;
            let mut trimmed = Vec::with_capacity(max_length);
            trimmed.push(system);
            trimmed.extend(history.into_iter().skip(tail));
            trimmed
        }
        _ => {
            let tail = history.len() - max_length;
            history.into_iter().skip(tail).collect()
        }
    }
}

/// Append a user turn then trim.
pub fn push_user_turn(mut history: Vec<ChatMessage>, message: &str, max_length: usize) -> Vec<ChatMessage> {
    history.push(ChatMessage::user(message));
    trim_history(history, max_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn numbered(n: usize) -> Vec<ChatMessage> {
        (0..n).map(|i| ChatMessage::user(format!("m{i}"))).collect()
    }

    #[test]
    fn test_short_history_unchanged() {
        let history = numbered(3);
        assert_eq!(trim_history(history.clone(), 5), history);
        assert_eq!(trim_history(history.clone(), 3), history);
    }

    #[test]
    fn test_without_system_keeps_tail() {
        let history = numbered(10);
        let trimmed = trim_history(history.clone(), 4);
        assert_eq!(trimmed, history[6..].to_vec());
    }

    #[test]
    fn test_leading_system_preserved() {
        let mut history = vec![ChatMessage::system("be nice")];
        history.extend(numbered(10));

        let trimmed = trim_history(history, 4);
        assert_eq!(trimmed.len(), 4);
        assert_eq!(trimmed[0], ChatMessage::system("be nice"));
        assert_eq!(trimmed[1].content, "m7");
        assert_eq!(trimmed[3].content, "m9");
    }

    #[test]
    fn test_system_in_middle_moves_to_front() {
        let mut history = numbered(5);
        history.insert(2, ChatMessage::system("rules"));
        history.extend(numbered(5));

        let trimmed = trim_history(history, 3);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].role, Role::System);
    }

    #[test]
    fn test_system_inside_tail_may_repeat() {
        // The kept tail is taken positionally; a system turn inside it stays where it is
        let history = vec![
            ChatMessage::user("a"),
            ChatMessage::system("s"),
            ChatMessage::user("b"),
        ];
        let trimmed = trim_history(history, 2);
        assert_eq!(trimmed, vec![ChatMessage::system("s"), ChatMessage::user("b")]);
    }

    #[test]
    fn test_push_user_turn_trims_after_append() {
        let history = vec![ChatMessage::system("sys"), ChatMessage::user("old")];
        let trimmed = push_user_turn(history, "new", 2);
        assert_eq!(trimmed, vec![ChatMessage::system("sys"), ChatMessage::user("new")]);
    }

    #[test]
    fn test_bounds_hold_over_lengths() {
        for max in 1..8 {
            for extra in 1..6 {
                let mut history = vec![ChatMessage::system("s")];
                history.extend(numbered(max + extra));
                let trimmed = trim_history(history, max);
                assert_eq!(trimmed.len(), max);
                assert_eq!(trimmed[0].role, Role::System);
            }
        }
    }
}
