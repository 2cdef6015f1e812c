//! Player state within a room

/// One assigned task and its completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub task_id: u32,
    pub complete: bool,
}

/// Role a player holds once the game starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerRole {
    Crewmate,
    Impostor,
}

/// Authoritative player record. Owned by the room; destroyed with it or
/// when the client leaves.
#[derive(Debug, Clone)]
pub struct Player {
    pub client_id: u32,
    /// In-game slot, allocated lowest-free on join.
    pub player_id: u8,
    pub name: String,
    pub color: u8,
    pub hat: u32,
    pub pet: u32,
    pub skin: u32,
    pub is_dead: bool,
    pub is_impostor: bool,
    pub is_ready: bool,
    pub in_scene: bool,
    pub tasks: Vec<TaskState>,
    /// Player ids this player has voted for in the open meeting.
    pub has_voted: bool,
}

impl Player {
    pub fn new(client_id: u32, player_id: u8) -> Self {
        Self {
            client_id,
            player_id,
            name: String::new(),
            color: 0,
            hat: 0,
            pet: 0,
            skin: 0,
            is_dead: false,
            is_impostor: false,
            is_ready: false,
            in_scene: false,
            tasks: Vec::new(),
            has_voted: false,
        }
    }

    pub fn role(&self) -> PlayerRole {
        if self.is_impostor {
            PlayerRole::Impostor
        } else {
            PlayerRole::Crewmate
        }
    }

    pub fn assign_tasks(&mut self, task_ids: &[u32]) {
        self.tasks = task_ids
            .iter()
            .map(|id| TaskState { task_id: *id, complete: false })
            .collect();
    }

    pub fn complete_task(&mut self, task_id: u32) -> bool {
        match self.tasks.iter_mut().find(|t| t.task_id == task_id) {
            Some(task) if !task.complete => {
                task.complete = true;
                true
            }
            _ => false,
        }
    }

    /// Reset per-game state when the room returns to the lobby.
    pub fn reset_for_lobby(&mut self) {
        self.is_dead = false;
        self.is_impostor = false;
        self.is_ready = false;
        self.in_scene = false;
        self.has_voted = false;
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_completion_is_idempotent() {
        let mut player = Player::new(1001, 0);
        player.assign_tasks(&[3, 7]);
        assert!(player.complete_task(3));
        assert!(!player.complete_task(3));
        assert!(!player.complete_task(99));
    }

    #[test]
    fn lobby_reset_clears_game_state() {
        let mut player = Player::new(1001, 0);
        player.is_dead = true;
        player.is_impostor = true;
        player.is_ready = true;
        player.assign_tasks(&[1]);
        player.reset_for_lobby();
        assert!(!player.is_dead);
        assert_eq!(player.role(), PlayerRole::Crewmate);
        assert!(player.tasks.is_empty());
    }
}
