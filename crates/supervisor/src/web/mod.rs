// Read-only status surface consumed by humans and the external renderer.

pub mod route;
