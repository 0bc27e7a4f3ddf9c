pub mod resource_policy;
