use skillroom_core::assist::AiTurn;

/// The newest `max_turns` turns of `turns`, in original order.
pub fn window_history(turns: &[AiTurn], max_turns: usize) -> &[AiTurn] {
    let start = turns.len().saturating_sub(max_turns);
    &turns[start..]
}
