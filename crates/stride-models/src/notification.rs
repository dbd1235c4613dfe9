use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ClientSignup,
    DailyCheckin,
    TaskCompleted,
    GoalAchieved,
    GroupJoinRequest,
    NewMessage,
    SessionReminder,
    System,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientSignup => "client_signup",
            Self::DailyCheckin => "daily_checkin",
            Self::TaskCompleted => "task_completed",
            Self::GoalAchieved => "goal_achieved",
            Self::GroupJoinRequest => "group_join_request",
            Self::NewMessage => "new_message",
            Self::SessionReminder => "session_reminder",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Notification payload as shaped by the fan-out service before it reaches
/// the store. `data` carries the kind-specific structured context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub priority: Priority,
}

impl NewNotification {
    pub fn client_signup(coach_id: i64, client_id: i64, client_name: &str) -> Self {
        Self {
            user_id: coach_id,
            kind: NotificationKind::ClientSignup,
            title: "New Client Signup".into(),
            body: format!("{client_name} has signed up and is ready to start their journey!"),
            data: json!({ "client_id": client_id, "client_name": client_name, "coach_id": coach_id }),
            priority: Priority::High,
        }
    }

    pub fn daily_checkin(coach_id: i64, client_id: i64, client_name: &str) -> Self {
        Self {
            user_id: coach_id,
            kind: NotificationKind::DailyCheckin,
            title: "Daily Check-in".into(),
            body: format!("{client_name} completed their daily check-in"),
            data: json!({ "client_id": client_id, "client_name": client_name, "coach_id": coach_id }),
            priority: Priority::Normal,
        }
    }

    pub fn task_completed(coach_id: i64, client_id: i64, client_name: &str, task_title: &str) -> Self {
        Self {
            user_id: coach_id,
            kind: NotificationKind::TaskCompleted,
            title: "Task Completed".into(),
            body: format!("{client_name} completed the task: \"{task_title}\""),
            data: json!({ "client_id": client_id, "client_name": client_name, "task_title": task_title }),
            priority: Priority::Normal,
        }
    }

    pub fn goal_achieved(coach_id: i64, client_id: i64, client_name: &str, goal_title: &str) -> Self {
        Self {
            user_id: coach_id,
            kind: NotificationKind::GoalAchieved,
            title: "Goal Achieved!".into(),
            body: format!("{client_name} achieved their goal: \"{goal_title}\""),
            data: json!({ "client_id": client_id, "client_name": client_name, "goal_title": goal_title }),
            priority: Priority::High,
        }
    }

    pub fn group_join_request(
        coach_id: i64,
        group_id: i64,
        group_name: &str,
        client_id: i64,
        client_name: &str,
        message: Option<&str>,
    ) -> Self {
        Self {
            user_id: coach_id,
            kind: NotificationKind::GroupJoinRequest,
            title: "New Group Join Request".into(),
            body: format!("{client_name} wants to join your group \"{group_name}\""),
            data: json!({
                "group_id": group_id,
                "group_name": group_name,
                "client_id": client_id,
                "client_name": client_name,
                "message": message.unwrap_or(""),
            }),
            priority: Priority::High,
        }
    }

    pub fn new_message(
        recipient_id: i64,
        sender_id: i64,
        sender_name: &str,
        room_id: i64,
        content: &str,
    ) -> Self {
        let preview = if content.chars().count() > 50 {
            let truncated: String = content.chars().take(50).collect();
            format!("{truncated}...")
        } else {
            content.to_string()
        };
        Self {
            user_id: recipient_id,
            kind: NotificationKind::NewMessage,
            title: "New Message".into(),
            body: format!("{sender_name}: {preview}"),
            data: json!({
                "room_id": room_id,
                "sender_id": sender_id,
                "sender_name": sender_name,
            }),
            priority: Priority::Normal,
        }
    }

    pub fn session_reminder(user_id: i64, session_title: &str, session_time: &str) -> Self {
        Self {
            user_id,
            kind: NotificationKind::SessionReminder,
            title: "Session Reminder".into(),
            body: format!("Your session \"{session_title}\" is starting in 15 minutes"),
            data: json!({ "session_title": session_title, "session_time": session_time }),
            priority: Priority::Urgent,
        }
    }

    pub fn task_assigned(user_id: i64, coach_id: i64, coach_name: &str, task_title: &str) -> Self {
        Self {
            user_id,
            kind: NotificationKind::System,
            title: "New Task Assigned".into(),
            body: format!("{coach_name} assigned you a new task: \"{task_title}\""),
            data: json!({ "coach_id": coach_id, "coach_name": coach_name, "task_title": task_title }),
            priority: Priority::Normal,
        }
    }

    pub fn resource_shared(user_id: i64, coach_id: i64, coach_name: &str, resource_title: &str) -> Self {
        Self {
            user_id,
            kind: NotificationKind::System,
            title: "New Resource Shared".into(),
            body: format!("{coach_name} shared a new resource: \"{resource_title}\""),
            data: json!({ "coach_id": coach_id, "coach_name": coach_name, "resource_title": resource_title }),
            priority: Priority::Normal,
        }
    }

    pub fn note_added(user_id: i64, coach_id: i64, coach_name: &str, note_title: &str) -> Self {
        Self {
            user_id,
            kind: NotificationKind::System,
            title: "New Note Added".into(),
            body: format!("{coach_name} added a note about you: \"{note_title}\""),
            data: json!({ "coach_id": coach_id, "coach_name": coach_name, "note_title": note_title }),
            priority: Priority::Normal,
        }
    }
}
