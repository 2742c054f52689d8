//! Resource and task identifiers

use uuid::Uuid;

use super::compound::Builder;
use super::{compound_identifier, ApplicationId, Field, InstanceId, NodeId};

compound_identifier! {
    /// A stateful resource owned by one node
    ResourceId, Resource, [Instance, Application, Resource]
}

compound_identifier! {
    /// A unit of work belonging to a resource
    TaskId, Task, [Instance, Application, Resource, Task]
}

impl ResourceId {
    /// New resource on `node`
    pub fn for_node(node: &NodeId) -> Self {
        Self::wrap(
            Builder::from_id(node.compound())
                .with_random(Field::Resource)
                .build(),
        )
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::narrowed(&self.id)
    }

    pub fn instance_id(&self) -> InstanceId {
        InstanceId::narrowed(&self.id)
    }

    pub fn application_id(&self) -> ApplicationId {
        ApplicationId::narrowed(&self.id)
    }

    pub fn resource_uuid(&self) -> Uuid {
        self.id.get(Field::Resource).unwrap_or_default()
    }
}

impl TaskId {
    /// New task on `resource`
    pub fn for_resource(resource: &ResourceId) -> Self {
        Self::wrap(
            Builder::from_id(resource.compound())
                .with_random(Field::Task)
                .build(),
        )
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId::narrowed(&self.id)
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::narrowed(&self.id)
    }

    pub fn application_id(&self) -> ApplicationId {
        ApplicationId::narrowed(&self.id)
    }

    pub fn task_uuid(&self) -> Uuid {
        self.id.get(Field::Task).unwrap_or_default()
    }
}
