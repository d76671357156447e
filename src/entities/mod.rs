pub mod delivery_option;
pub mod order;
pub mod order_item;

pub use delivery_option::Entity as DeliveryOption;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;

pub use order::Model as OrderModel;
pub use order_item::Model as OrderItemModel;
