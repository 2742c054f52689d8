//! Instance, application and node identifiers

use bytes::{Buf, BufMut};
use uuid::Uuid;

use super::compound::{Builder, CompoundId};
use super::{compound_identifier, Field, InvalidIdError};

compound_identifier! {
    /// A physical worker process in the cluster
    InstanceId, Instance, [Instance]
}

compound_identifier! {
    /// A logical application, deployed on any number of instances
    ApplicationId, Application, [Application]
}

compound_identifier! {
    /// One application's worker on one instance; the unit of routing
    NodeId, Node, [Instance, Application]
}

impl InstanceId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::wrap(Builder::new().with(Field::Instance, uuid).build())
    }

    pub fn uuid(&self) -> Uuid {
        self.id.get(Field::Instance).unwrap_or_default()
    }
}

impl ApplicationId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::wrap(Builder::new().with(Field::Application, uuid).build())
    }

    pub fn uuid(&self) -> Uuid {
        self.id.get(Field::Application).unwrap_or_default()
    }
}

impl NodeId {
    /// Node of `application` running on `instance`
    pub fn for_instance_and_application(instance: &InstanceId, application: &ApplicationId) -> Self {
        Self::wrap(
            Builder::new()
                .with(Field::Instance, instance.uuid())
                .with(Field::Application, application.uuid())
                .build(),
        )
    }

    /// The instance's own control node: its application value is the
    /// instance value
    pub fn for_master_node(instance: &InstanceId) -> Self {
        Self::for_instance_and_application(instance, &ApplicationId::from_uuid(instance.uuid()))
    }

    pub fn is_master_node(&self) -> bool {
        self.instance_uuid() == self.application_uuid()
    }

    pub fn instance_id(&self) -> InstanceId {
        InstanceId::narrowed(&self.id)
    }

    pub fn application_id(&self) -> ApplicationId {
        ApplicationId::narrowed(&self.id)
    }

    pub fn instance_uuid(&self) -> Uuid {
        self.id.get(Field::Instance).unwrap_or_default()
    }

    pub fn application_uuid(&self) -> Uuid {
        self.id.get(Field::Application).unwrap_or_default()
    }

    /// Append the binary form to a wire buffer
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.as_bytes());
    }

    /// Read a node id embedded in a wire buffer, leaving any trailing bytes
    pub fn read_from<B: Buf>(buf: &mut B) -> Result<Self, InvalidIdError> {
        CompoundId::read_from(buf, Self::FIELDS.len())
            .map_err(InvalidIdError::Node)
            .and_then(Self::from_compound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::IdError;
    use std::collections::HashSet;

    #[test]
    fn test_node_from_parts() {
        let instance = InstanceId::random();
        let application = ApplicationId::random();
        let node = NodeId::for_instance_and_application(&instance, &application);

        assert_eq!(node.instance_id(), instance);
        assert_eq!(node.application_id(), application);
        assert!(!node.is_master_node());
    }

    #[test]
    fn test_master_node() {
        let instance = InstanceId::random();
        let master = NodeId::for_master_node(&instance);

        assert!(master.is_master_node());
        assert_eq!(master.application_uuid(), instance.uuid());
    }

    #[test]
    fn test_cached_representations_are_stable() {
        let node = NodeId::random();
        let first = node.as_str().as_ptr();
        assert_eq!(node.as_str().as_ptr(), first);
        assert_eq!(node.to_string(), node.as_str());
        assert_eq!(node.as_bytes().len(), NodeId::SIZE_IN_BYTES);
        assert_eq!(NodeId::SIZE_IN_BYTES, 35);
    }

    #[test]
    fn test_wrong_field_set_is_rejected() {
        let node = NodeId::random();
        let err = InstanceId::parse(node.as_str()).unwrap_err();
        assert!(matches!(err, InvalidIdError::Instance(IdError::UnexpectedField { field: Field::Application })));

        let instance = InstanceId::random();
        let err = NodeId::parse(instance.as_str()).unwrap_err();
        assert!(matches!(err, InvalidIdError::Node(IdError::MissingField { field: Field::Application })));
    }

    #[test]
    fn test_buffer_round_trip() {
        let node = NodeId::random();
        let mut buf = Vec::<u8>::new();
        node.write_to(&mut buf);
        buf.extend_from_slice(&[7, 7]);

        let mut cursor = &buf[..];
        assert_eq!(NodeId::read_from(&mut cursor).unwrap(), node);
        assert_eq!(cursor, &[7u8, 7]);

        let mut short = &buf[..10];
        assert!(NodeId::read_from(&mut short).is_err());
    }

    #[test]
    fn test_hash_matches_equality() {
        let node = NodeId::random();
        let copy = NodeId::parse(node.as_str()).unwrap();
        let set: HashSet<_> = [node.clone(), copy].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
