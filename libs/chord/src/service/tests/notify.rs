use crate::client::MockClient;
use crate::service::tests;
use crate::{NodeId, NodeService};

#[test]
fn when_calling_notify_and_predecessor_is_none_then_the_predecessor_should_be_set() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_successor(tests::node(16));

    assert!(service.store().predecessor().is_none());
    service.notify(tests::node(4));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(4u64));
}

#[test]
fn when_calling_notify_and_request_node_is_in_range_then_the_predecessor_should_be_set() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_successor(tests::node(16));
    service.store().set_predecessor(tests::node(4));

    service.notify(tests::node(6));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(6u64));
}

#[test]
fn when_calling_notify_and_request_node_is_not_in_range_then_the_predecessor_should_not_be_set() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_successor(tests::node(16));
    service.store().set_predecessor(tests::node(4));

    service.notify(tests::node(16));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(4u64));
}

#[test]
fn the_open_interval_excludes_the_node_itself() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_successor(tests::node(16));
    service.store().set_predecessor(tests::node(4));

    // 8 is not in (4, 8), so the pointer must not move.
    service.notify(tests::node(8));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(4u64));
}

#[test]
fn notify_from_self_is_accepted_once_on_a_ring_of_one() {
    let service: NodeService<MockClient> = NodeService::test_service(8);

    service.notify(service.as_node());
    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(8u64));

    // The second self-notify changes nothing.
    service.notify(service.as_node());
    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(8u64));
}

#[test]
fn any_other_caller_replaces_a_predecessor_pointing_home() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_predecessor(tests::node(8));

    service.notify(tests::node(12));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(12u64));
}

#[test]
fn a_repeated_caller_does_not_move_the_pointer() {
    let service: NodeService<MockClient> = NodeService::test_service(8);
    service.store().set_predecessor(tests::node(4));

    service.notify(tests::node(4));

    assert_eq!(service.store().predecessor().unwrap().id(), NodeId::from(4u64));
}
