use std::fmt::Write;

use crate::models::{EitProfile, Notification, ProgressSnapshot, Relationship, SkillCategory};

pub fn build_report(
    profile: &EitProfile,
    progress: &ProgressSnapshot,
    categories: &[SkillCategory],
    relationships: &[Relationship],
    notifications: &[Notification],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# EIT Progress Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}) on {}",
        profile.full_name,
        profile.email,
        progress.computed_at.format("%Y-%m-%d")
    );
    if let (Some(start), Some(target)) = (profile.start_date, profile.target_date) {
        let _ = writeln!(output, "Program window: {start} to {target}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## Overall Progress");
    let _ = writeln!(output, "- Overall: {}%", progress.overall_progress);
    let _ = writeln!(output, "- Skills ranked: {}", progress.completed_skills);
    let _ = writeln!(
        output,
        "- Experiences documented: {}",
        progress.documented_experiences
    );
    let _ = writeln!(
        output,
        "- Supervisor approvals: {}",
        progress.supervisor_approvals
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Skills by Category");

    if categories.is_empty() {
        let _ = writeln!(output, "No skills loaded.");
    } else {
        let _ = writeln!(output, "| Category | Completed | Progress |");
        let _ = writeln!(output, "| --- | --- | --- |");
        for category in categories {
            let percentage = category
                .percentage()
                .map(|p| format!("{p}%"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "| {} | {}/{} | {} |",
                category.name,
                category.completed(),
                category.total(),
                percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Supervisors");

    if relationships.is_empty() {
        let _ = writeln!(output, "No supervisor connections.");
    } else {
        for relationship in relationships {
            let _ = writeln!(
                output,
                "- {} since {} ({})",
                relationship.supervisor_id,
                relationship.created_at.format("%Y-%m-%d"),
                relationship.status
            );
        }
    }

    let mut recent = notifications.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Notifications");

    if recent.is_empty() {
        let _ = writeln!(output, "No notifications.");
    } else {
        for notification in recent.iter().take(5) {
            let marker = if notification.read { " " } else { "*" };
            let _ = writeln!(
                output,
                "- {marker} {} on {}: {}",
                notification.title,
                notification.created_at.format("%Y-%m-%d"),
                notification.message
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::Skill;

    fn profile() -> EitProfile {
        EitProfile {
            id: Uuid::new_v4(),
            full_name: "Avery Lee".to_string(),
            email: "avery@example.com".to_string(),
            start_date: None,
            target_date: None,
        }
    }

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            overall_progress: 42,
            completed_skills: 11,
            documented_experiences: 12,
            supervisor_approvals: 6,
            computed_at: Utc::now(),
        }
    }

    fn notification(title: &str, minutes_ago: i64) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: "general".to_string(),
            title: title.to_string(),
            message: "details".to_string(),
            link: None,
            read: false,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn report_lists_progress_and_categories() {
        let categories = vec![
            SkillCategory {
                id: 1,
                name: "Communication".to_string(),
                skills: vec![Skill {
                    id: Uuid::new_v4(),
                    category_id: 1,
                    code: "2.1".to_string(),
                    name: "Oral communication".to_string(),
                    rank: Some(4),
                }],
            },
            SkillCategory {
                id: 2,
                name: "Empty".to_string(),
                skills: Vec::new(),
            },
        ];

        let report = build_report(&profile(), &snapshot(), &categories, &[], &[]);

        assert!(report.contains("- Overall: 42%"));
        assert!(report.contains("| Communication | 1/1 | 100% |"));
        assert!(report.contains("| Empty | 0/0 | n/a |"));
        assert!(report.contains("No supervisor connections."));
        assert!(report.contains("No notifications."));
    }

    #[test]
    fn report_shows_newest_notifications_first() {
        let notifications = vec![notification("older", 30), notification("newer", 1)];
        let report = build_report(&profile(), &snapshot(), &[], &[], &notifications);

        let newer = report.find("newer").unwrap();
        let older = report.find("older").unwrap();
        assert!(newer < older);
    }
}
