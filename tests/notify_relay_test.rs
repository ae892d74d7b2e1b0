use helpdesk_server::notify::{EventBroadcaster, TicketEvent};
use helpdesk_server::tickets::TicketStatus;
use uuid::Uuid;

#[tokio::test]
async fn relay_fans_out_to_concurrent_subscribers() {
    let broadcaster = EventBroadcaster::new(32);
    let ticket_id = Uuid::new_v4();
    let assigned_to = Uuid::new_v4();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let mut rx = broadcaster.subscribe();
        handles.push(tokio::spawn(async move {
            let first = rx.recv().await.expect("first event");
            let second = rx.recv().await.expect("second event");
            (first, second)
        }));
    }

    // Give the spawned subscribers a chance to be polled before publishing.
    tokio::task::yield_now().await;

    broadcaster.publish(TicketEvent::Assigned {
        ticket_id,
        assigned_to,
    });
    broadcaster.publish(TicketEvent::StatusUpdated {
        ticket_id,
        status: TicketStatus::InProgress,
    });

    for handle in handles {
        let (first, second) = handle.await.expect("subscriber task");
        assert_eq!(
            first,
            TicketEvent::Assigned {
                ticket_id,
                assigned_to,
            }
        );
        assert_eq!(
            second,
            TicketEvent::StatusUpdated {
                ticket_id,
                status: TicketStatus::InProgress,
            }
        );
    }
}

#[tokio::test]
async fn late_subscriber_never_sees_missed_events() {
    let broadcaster = EventBroadcaster::new(32);
    let keep_alive = broadcaster.subscribe();

    broadcaster.publish(TicketEvent::StatusUpdated {
        ticket_id: Uuid::new_v4(),
        status: TicketStatus::Closed,
    });

    // A subscriber that connects after the fact starts empty; missed events
    // are never redelivered.
    let mut late = broadcaster.subscribe();
    assert!(matches!(
        late.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
    drop(keep_alive);
}

#[test]
fn event_frames_use_original_socket_names() {
    let ticket_id = Uuid::new_v4();

    let frame = serde_json::to_value(TicketEvent::StatusUpdated {
        ticket_id,
        status: TicketStatus::Resolved,
    })
    .expect("serialize");
    assert_eq!(frame["event"], "ticketStatusUpdated");
    assert_eq!(frame["ticketId"], ticket_id.to_string());
    assert_eq!(frame["status"], "Resolved");

    let assigned_to = Uuid::new_v4();
    let frame = serde_json::to_value(TicketEvent::Assigned {
        ticket_id,
        assigned_to,
    })
    .expect("serialize");
    assert_eq!(frame["event"], "ticketAssigned");
    assert_eq!(frame["assignedTo"], assigned_to.to_string());
}
