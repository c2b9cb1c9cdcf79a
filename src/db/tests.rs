use super::init::migrate;
use super::invites::InviteRepository;
use super::schedules::ScheduleRepository;
use crate::invite::{Invite, InviteStatus, Platform, TriggerPayload};
use crate::scheduler::ScheduleEntry;
use anyhow::Result;
use rusqlite::Connection;

fn setup_test_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn create_test_entry(invite_id: &str, fires_at: i64) -> ScheduleEntry {
    ScheduleEntry {
        invite_id: invite_id.to_string(),
        fires_at,
        target: TriggerPayload {
            invite_id: invite_id.to_string(),
            platform: Platform::Chime,
            meeting_id: "1234567890".to_string(),
            meeting_password: None,
            scheduled_epoch_seconds: Some(fires_at + 10),
            bot_display_name_seed: "Scribe".to_string(),
        },
        fired_at: None,
    }
}

#[test]
fn test_migrate_creates_tables() {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn).unwrap();
    // Running twice must be harmless
    migrate(&conn).unwrap();

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('invites', 'schedule_entries')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_insert_and_get_invite() {
    let conn = setup_test_db().unwrap();
    let invite = Invite::new("Weekly sync", Platform::Webex, "2468", Some(1_700_000_000))
        .with_password(Some("secret".to_string()))
        .with_recipients(vec!["a@example.com".to_string(), "b@example.com".to_string()]);

    InviteRepository::insert(&conn, &invite).unwrap();

    let loaded = InviteRepository::get(&conn, &invite.id).unwrap().unwrap();
    assert_eq!(loaded, invite);
    assert!(InviteRepository::get(&conn, "missing").unwrap().is_none());
}

#[test]
fn test_update_status_bumps_updated_at() {
    let conn = setup_test_db().unwrap();
    let invite = Invite::new("Standup", Platform::Chime, "1", None);
    InviteRepository::insert(&conn, &invite).unwrap();

    // A clock behind the record still moves updated_at forward
    let updated = InviteRepository::update_status(&conn, &invite.id, InviteStatus::Joined, 0)
        .unwrap()
        .unwrap();
    assert_eq!(updated, invite.updated_at + 1);

    let loaded = InviteRepository::get(&conn, &invite.id).unwrap().unwrap();
    assert_eq!(loaded.status, InviteStatus::Joined);

    assert!(InviteRepository::update_status(&conn, "missing", InviteStatus::Failed, 0)
        .unwrap()
        .is_none());
}

#[test]
fn test_delete_invite() {
    let conn = setup_test_db().unwrap();
    let invite = Invite::new("Retro", Platform::Teams, "https://teams.example/x", None);
    InviteRepository::insert(&conn, &invite).unwrap();

    assert!(InviteRepository::delete(&conn, &invite.id).unwrap());
    assert!(!InviteRepository::delete(&conn, &invite.id).unwrap());
    assert!(InviteRepository::list(&conn, 10).unwrap().is_empty());
}

#[test]
fn test_list_invites_soonest_first() {
    let conn = setup_test_db().unwrap();
    let later = Invite::new("Later", Platform::Chime, "2", Some(2_000));
    let sooner = Invite::new("Sooner", Platform::Chime, "1", Some(1_000));
    InviteRepository::insert(&conn, &later).unwrap();
    InviteRepository::insert(&conn, &sooner).unwrap();

    let names: Vec<_> = InviteRepository::list(&conn, 10)
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, vec!["Sooner", "Later"]);
}

#[test]
fn test_upsert_keeps_one_entry_per_invite() {
    let conn = setup_test_db().unwrap();

    ScheduleRepository::upsert(&conn, &create_test_entry("a", 100)).unwrap();
    ScheduleRepository::upsert(&conn, &create_test_entry("a", 200)).unwrap();

    let entries = ScheduleRepository::list(&conn).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].fires_at, 200);
}

#[test]
fn test_due_and_mark_fired() {
    let conn = setup_test_db().unwrap();
    ScheduleRepository::upsert(&conn, &create_test_entry("early", 100)).unwrap();
    ScheduleRepository::upsert(&conn, &create_test_entry("late", 500)).unwrap();

    let due = ScheduleRepository::due(&conn, 150).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].invite_id, "early");

    assert!(ScheduleRepository::mark_fired(&conn, "early", 150).unwrap());
    // Second claim loses
    assert!(!ScheduleRepository::mark_fired(&conn, "early", 151).unwrap());
    assert!(ScheduleRepository::due(&conn, 150).unwrap().is_empty());

    // Replacing the entry re-arms it
    ScheduleRepository::upsert(&conn, &create_test_entry("early", 120)).unwrap();
    assert_eq!(ScheduleRepository::due(&conn, 150).unwrap().len(), 1);
}

#[test]
fn test_delete_schedule_entry() {
    let conn = setup_test_db().unwrap();
    ScheduleRepository::upsert(&conn, &create_test_entry("a", 100)).unwrap();

    assert!(ScheduleRepository::delete(&conn, "a").unwrap());
    assert!(!ScheduleRepository::delete(&conn, "a").unwrap());
    assert!(ScheduleRepository::get(&conn, "a").unwrap().is_none());
}
