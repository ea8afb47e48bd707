//! Storefront views and actions.

use edge_sdk::edge_engine::{
    cache, not_found, request, ActionRegistry, Node, SetCookie, ViewError, ViewProps, ViewRegistry,
};
use serde::Deserialize;
use serde_json::{json, Value};

struct Product {
    id: &'static str,
    name: &'static str,
    price_cents: u64,
    photos: &'static [&'static str],
}

const CATALOG: &[Product] = &[
    Product {
        id: "1",
        name: "Trail Runner",
        price_cents: 12900,
        photos: &["101", "102"],
    },
    Product {
        id: "2",
        name: "City Sneaker",
        price_cents: 8900,
        photos: &["201"],
    },
];

fn find(id: &str) -> Option<&'static Product> {
    CATALOG.iter().find(|p| p.id == id)
}

fn link(href: &str, text: &str) -> Node {
    Node::element("a").attr("href", href).child(Node::text(text))
}

fn price(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

async fn root(_props: ViewProps) -> Result<Node, ViewError> {
    let nav = Node::element("nav")
        .child(link("/", "Home"))
        .child(link("/account", "Account"));
    Ok(Node::fragment(vec![nav, Node::element("main").child(Node::Outlet)]))
}

async fn home(_props: ViewProps) -> Result<Node, ViewError> {
    let items = CATALOG.iter().fold(Node::element("ul"), |list, product| {
        list.child(Node::element("li").child(link(&format!("/products/{}", product.id), product.name)))
    });
    Ok(Node::element("section")
        .child(Node::element("h1").child(Node::text("Featured")))
        .child(items))
}

async fn shop(_props: ViewProps) -> Result<Node, ViewError> {
    Ok(Node::element("div")
        .attr("class", "shop")
        .child(Node::Outlet)
        .child(Node::Slot("modal".to_string())))
}

async fn product(props: ViewProps) -> Result<Node, ViewError> {
    let product = props.param("id").and_then(find).ok_or_else(not_found)?;
    cache::revalidate(60);

    let gallery = product.photos.iter().fold(Node::element("ul"), |list, photo| {
        list.child(Node::element("li").child(link(&format!("/photos/{}", photo), &format!("Photo {}", photo))))
    });
    Ok(Node::element("article")
        .child(Node::element("h1").child(Node::text(product.name)))
        .child(Node::element("p").child(Node::text(price(product.price_cents))))
        .child(gallery)
        .child(
            Node::element("button")
                .attr("data-action", "add-to-cart")
                .attr("data-args", json!({ "id": product.id }).to_string())
                .child(Node::text("Add to cart")),
        ))
}

async fn photo(props: ViewProps) -> Result<Node, ViewError> {
    let pid = props.param("pid").ok_or_else(not_found)?;
    Ok(Node::element("figure").child(Node::element("img").attr("src", format!("/_edge/image?url=/photos/{}.jpg", pid))))
}

async fn photo_modal(props: ViewProps) -> Result<Node, ViewError> {
    let figure = photo(props).await?;
    Ok(Node::element("dialog").attr("open", "").child(figure))
}

async fn account(_props: ViewProps) -> Result<Node, ViewError> {
    let cookies = request::cookies()?;
    let cart = cookies.get("cart").unwrap_or("0");
    Ok(Node::element("section")
        .child(Node::element("h1").child(Node::text("Your account")))
        .child(Node::element("p").child(Node::text(format!("{} item(s) in your cart", cart)))))
}

async fn error_view(props: ViewProps) -> Result<Node, ViewError> {
    let message = props.error.map(|e| format!("{} ({})", e.message, e.digest)).unwrap_or_default();
    Ok(Node::element("div").attr("role", "alert").child(Node::text(message)))
}

/// Every view the route table names.
pub fn registry() -> ViewRegistry {
    ViewRegistry::new()
        .with_fn("root", root)
        .with_fn("home", home)
        .with_fn("shop", shop)
        .with_fn("product", product)
        .with_fn("photo", photo)
        .with_fn("photo-modal", photo_modal)
        .with_fn("account", account)
        .with_fn("product-error", error_view)
        .with_fn("global-error", error_view)
        .with_static("product-loading", Node::element("p").child(Node::text("Loading product...")))
        .with_static("product-not-found", Node::element("p").child(Node::text("We could not find that product.")))
        .with_static("modal-empty", Node::Empty)
        .with_static("not-found", Node::element("h1").child(Node::text("Page not found")))
        .with_static("sign-in", Node::element("p").child(Node::text("Please sign in.")))
}

#[derive(Deserialize)]
struct AddToCart {
    id: String,
}

async fn add_to_cart(args: Value) -> Result<Value, ViewError> {
    let args: AddToCart = serde_json::from_value(args).map_err(|err| ViewError::failure(err.to_string()))?;
    let product = find(&args.id).ok_or_else(not_found)?;

    let count = request::cookies()?
        .get("cart")
        .and_then(|c| c.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    request::cookies_mut()?.set(SetCookie::new("cart", count.to_string()).with_path("/").http_only());

    tracing::info!(product = product.id, count, "added to cart");
    Ok(json!({ "count": count }))
}

/// Mutation actions by identifier.
pub fn actions() -> ActionRegistry {
    ActionRegistry::new().with_fn("add-to-cart", add_to_cart)
}
